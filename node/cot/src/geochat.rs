// Copyright 2026 The takyr Developers
// This file is part of the takyr library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:

// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{errors::UnmarshalError, teams::Teams, xml::XmlElement};

use chrono::{DateTime, SecondsFormat, Utc};

/// The chatroom name that addresses every connected client.
pub const ALL_CHAT_ROOMS: &str = "All Chat Rooms";

/// The `parent` value for direct chats.
pub const CHAT_PARENT_ROOT: &str = "RootContactGroup";
/// The `parent` value for team-scoped chats.
pub const CHAT_PARENT_TEAM: &str = "TeamGroups";

/// The tag set that identifies a geochat detail.
pub(crate) const GEOCHAT_TAGS: [&str; 3] = ["__chat", "remarks", "link"];

/// Where a chat message is going. Inferred from the chatroom name and the
/// chat parent; exactly one destination applies per message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatDestination {
    /// Addressed to "All Chat Rooms": every session except the origin.
    Broadcast,
    /// Addressed to a team chatroom: every identified member of the team.
    Team(Teams),
    /// Addressed to an individual recipient by uid.
    User(String),
}

/// A chat message embedded as CoT.
///
/// The payloads the clients produce are redundant and conflict in type; this
/// unifies the field names and infers the routing destination.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoChat {
    /// The chatroom name, e.g. "All Chat Rooms", a team name, or a callsign.
    pub chatroom: String,
    /// The chat parent group, `RootContactGroup` or `TeamGroups`.
    pub chat_parent: String,
    /// Whether the sender owns the chat group.
    pub group_owner: bool,
    /// The sender uid (`link@uid`).
    pub src_uid: String,
    /// The sender callsign (`__chat@senderCallsign`).
    pub src_cs: String,
    /// The sender marker type (`link@type`).
    pub src_marker: String,
    /// The message body.
    pub message: String,
    /// The inferred destination.
    pub dst: ChatDestination,
}

impl GeoChat {
    /// Reads a chat message from a `<detail>` element.
    pub fn from_element(element: &XmlElement) -> Result<Self, UnmarshalError> {
        let chat = element.child("__chat").ok_or(UnmarshalError::NotAGeoChat)?;
        let remarks = element.child("remarks").ok_or(UnmarshalError::NotAGeoChat)?;
        let link = element.child("link").ok_or(UnmarshalError::NotAGeoChat)?;
        if chat.child("chatgrp").is_none() {
            return Err(UnmarshalError::NotAGeoChat);
        }

        let chatroom = chat.attr("chatroom").unwrap_or_default().to_string();
        let chat_parent = chat.attr("parent").unwrap_or_default().to_string();

        let dst = if chat_parent == CHAT_PARENT_TEAM {
            ChatDestination::Team(Teams::from(chatroom.as_str()))
        } else if chatroom == ALL_CHAT_ROOMS {
            ChatDestination::Broadcast
        } else {
            let recipient = chat
                .attr("id")
                .ok_or(UnmarshalError::MissingAttribute { tag: "__chat", attribute: "id" })?;
            ChatDestination::User(recipient.to_string())
        };

        Ok(Self {
            chatroom,
            chat_parent,
            group_owner: chat.attr("groupOwner") == Some("true"),
            src_uid: link.attr("uid").unwrap_or_default().to_string(),
            src_cs: chat.attr("senderCallsign").unwrap_or_default().to_string(),
            src_marker: link.attr("type").unwrap_or_default().to_string(),
            message: remarks.text().unwrap_or_default().to_string(),
            dst,
        })
    }

    /// Renders the chat message as a `<detail>` element.
    ///
    /// The destination uid token is `All Chat Rooms` for broadcasts, the team
    /// name for team chats, and the recipient uid otherwise.
    pub fn to_element(&self, time: DateTime<Utc>) -> XmlElement {
        let dst_uid = match &self.dst {
            ChatDestination::Broadcast => ALL_CHAT_ROOMS,
            ChatDestination::Team(team) => team.name(),
            ChatDestination::User(uid) => uid.as_str(),
        };

        let mut detail = XmlElement::new("detail");

        let mut chat = XmlElement::new("__chat");
        chat.set_attr("parent", self.chat_parent.clone());
        chat.set_attr("groupOwner", if self.group_owner { "true" } else { "false" });
        chat.set_attr("chatroom", self.chatroom.clone());
        chat.set_attr("id", dst_uid);
        chat.set_attr("senderCallsign", self.src_cs.clone());

        let mut chatgrp = XmlElement::new("chatgrp");
        chatgrp.set_attr("uid0", self.src_uid.clone());
        chatgrp.set_attr("uid1", dst_uid);
        chatgrp.set_attr("id", dst_uid);
        chat.push_child(chatgrp);
        detail.push_child(chat);

        let mut link = XmlElement::new("link");
        link.set_attr("uid", self.src_uid.clone());
        link.set_attr("type", self.src_marker.clone());
        link.set_attr("relation", "p-p");
        detail.push_child(link);

        let mut remarks = XmlElement::new("remarks");
        remarks.set_attr("source", format!("BAO.F.ATAK.{}", self.src_uid));
        remarks.set_attr("to", dst_uid);
        remarks.set_attr("time", time.to_rfc3339_opts(SecondsFormat::Millis, true));
        remarks.set_text(self.message.clone());
        detail.push_child(remarks);

        detail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_detail(parent: &str, chatroom: &str, id: &str) -> XmlElement {
        let doc = format!(
            r#"<detail><__chat parent="{parent}" groupOwner="false" chatroom="{chatroom}" id="{id}" senderCallsign="JENNY"><chatgrp uid0="ANDROID-deadbeef" uid1="{id}" id="{id}"/></__chat><link uid="ANDROID-deadbeef" type="a-f-G-U-C" relation="p-p"/><remarks source="BAO.F.ATAK.ANDROID-deadbeef" to="{id}" time="2021-02-23T22:28:22.191Z">test</remarks></detail>"#
        );
        XmlElement::from_bytes(doc.as_bytes()).unwrap()
    }

    #[test]
    fn reads_a_direct_message() {
        let element = chat_detail(CHAT_PARENT_ROOT, "JOKER MAN", "ANDROID-cafebabe");
        let chat = GeoChat::from_element(&element).unwrap();

        assert_eq!(chat.chatroom, "JOKER MAN");
        assert_eq!(chat.chat_parent, CHAT_PARENT_ROOT);
        assert!(!chat.group_owner);
        assert_eq!(chat.src_uid, "ANDROID-deadbeef");
        assert_eq!(chat.src_cs, "JENNY");
        assert_eq!(chat.src_marker, "a-f-G-U-C");
        assert_eq!(chat.message, "test");
        assert_eq!(chat.dst, ChatDestination::User("ANDROID-cafebabe".to_string()));
    }

    #[test]
    fn infers_a_broadcast() {
        let element = chat_detail(CHAT_PARENT_ROOT, ALL_CHAT_ROOMS, "All Chat Rooms");
        let chat = GeoChat::from_element(&element).unwrap();
        assert_eq!(chat.dst, ChatDestination::Broadcast);
    }

    #[test]
    fn infers_a_team_destination() {
        let element = chat_detail(CHAT_PARENT_TEAM, "Cyan", "Cyan");
        let chat = GeoChat::from_element(&element).unwrap();
        assert_eq!(chat.dst, ChatDestination::Team(Teams::Cyan));
    }

    #[test]
    fn requires_the_chat_group() {
        let doc = br#"<detail><__chat parent="RootContactGroup" chatroom="X" id="Y"/><link uid="a"/><remarks>hi</remarks></detail>"#;
        let element = XmlElement::from_bytes(doc).unwrap();
        assert!(matches!(GeoChat::from_element(&element), Err(UnmarshalError::NotAGeoChat)));
    }

    #[test]
    fn renders_the_destination_token() {
        let element = chat_detail(CHAT_PARENT_TEAM, "Cyan", "Cyan");
        let chat = GeoChat::from_element(&element).unwrap();
        let rendered = chat.to_element("2021-02-23T22:28:22.191Z".parse().unwrap());

        let chat_element = rendered.child("__chat").unwrap();
        assert_eq!(chat_element.attr("id"), Some("Cyan"));
        assert_eq!(chat_element.child("chatgrp").unwrap().attr("uid1"), Some("Cyan"));
        let remarks = rendered.child("remarks").unwrap();
        assert_eq!(remarks.attr("to"), Some("Cyan"));
        assert_eq!(remarks.attr("time"), Some("2021-02-23T22:28:22.191Z"));
        assert_eq!(remarks.text(), Some("test"));
    }
}
