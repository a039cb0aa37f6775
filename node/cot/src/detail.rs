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

use crate::{
    errors::UnmarshalError,
    geochat::{GeoChat, GEOCHAT_TAGS},
    takuser::{TakUser, TAKUSER_TAGS},
    xml::XmlElement,
};

/// One destination of a marti routing block: a `<dest>` child addressed by
/// uid, callsign, or both. A uid match is preferred over a callsign match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MartiDest {
    pub uid: Option<String>,
    pub callsign: Option<String>,
}

/// The variant-typed payload of an event.
///
/// The variant is selected by the set of child tag names: a self-description
/// carries `{takv, contact, __group}`, a chat message carries
/// `{__chat, remarks, link}`, and anything else is carried verbatim. Every
/// variant retains the original element so routed events round-trip exactly
/// as they arrived.
#[derive(Clone, Debug, PartialEq)]
pub enum Detail {
    TakUser { user: TakUser, element: XmlElement },
    GeoChat { chat: GeoChat, element: XmlElement },
    Generic(XmlElement),
}

impl Detail {
    /// Reads a detail payload from a `<detail>` element. The `uid` and
    /// `etype` of the enclosing event feed the self-description variant.
    pub fn from_element(element: &XmlElement, uid: &str, etype: &str) -> Result<Self, UnmarshalError> {
        let tags = element.child_names();
        if TAKUSER_TAGS.iter().all(|tag| tags.contains(tag)) {
            let user = TakUser::from_element(element, uid, etype)?;
            Ok(Self::TakUser { user, element: element.clone() })
        } else if GEOCHAT_TAGS.iter().all(|tag| tags.contains(tag)) {
            let chat = GeoChat::from_element(element)?;
            Ok(Self::GeoChat { chat, element: element.clone() })
        } else {
            Ok(Self::Generic(element.clone()))
        }
    }

    /// Returns the original `<detail>` element, whichever the variant.
    pub fn element(&self) -> &XmlElement {
        match self {
            Self::TakUser { element, .. } => element,
            Self::GeoChat { element, .. } => element,
            Self::Generic(element) => element,
        }
    }

    /// Returns the parsed self-description, if this is one.
    pub fn as_user(&self) -> Option<&TakUser> {
        match self {
            Self::TakUser { user, .. } => Some(user),
            _ => None,
        }
    }

    /// Returns the parsed chat message, if this is one.
    pub fn as_chat(&self) -> Option<&GeoChat> {
        match self {
            Self::GeoChat { chat, .. } => Some(chat),
            _ => None,
        }
    }

    /// Returns the destinations listed in the marti routing block, in order.
    pub fn marti_dests(&self) -> Vec<MartiDest> {
        let Some(marti) = self.element().child("marti") else {
            return Vec::new();
        };
        marti
            .children_named("dest")
            .map(|dest| MartiDest {
                uid: dest.attr("uid").map(str::to_string),
                callsign: dest.attr("callsign").map(str::to_string),
            })
            .collect()
    }

    /// Returns `true` if the detail carries a marti block with at least one
    /// destination. A `<marti>` with no `<dest>` children does not count and
    /// the event broadcasts instead.
    pub fn has_marti(&self) -> bool {
        !self.marti_dests().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminates_a_self_description() {
        let doc = br#"<detail><takv os="29"/><contact callsign="JENNY" endpoint="*:-1:stcp"/><__group role="Team Member" name="Cyan"/></detail>"#;
        let element = XmlElement::from_bytes(doc).unwrap();
        let detail = Detail::from_element(&element, "uid-1", "a-f-G-U-C").unwrap();
        assert!(detail.as_user().is_some());
        assert_eq!(detail.as_user().unwrap().callsign.as_deref(), Some("JENNY"));
    }

    #[test]
    fn discriminates_a_chat_message() {
        let doc = br#"<detail><__chat parent="RootContactGroup" chatroom="X" id="u2" senderCallsign="A"><chatgrp uid0="u1" uid1="u2" id="u2"/></__chat><link uid="u1" type="a-f-G"/><remarks>hi</remarks></detail>"#;
        let element = XmlElement::from_bytes(doc).unwrap();
        let detail = Detail::from_element(&element, "u1", "b-t-f").unwrap();
        assert!(detail.as_chat().is_some());
    }

    #[test]
    fn self_description_wins_over_chat_tags() {
        // All six discriminating tags present: the self-description is checked first.
        let doc = br#"<detail><takv os="29"/><contact callsign="J" endpoint="e"/><__group role="r" name="Cyan"/><__chat parent="p" chatroom="c" id="i"><chatgrp uid0="a" uid1="b" id="i"/></__chat><link uid="a"/><remarks>x</remarks></detail>"#;
        let element = XmlElement::from_bytes(doc).unwrap();
        let detail = Detail::from_element(&element, "u", "a-f-G").unwrap();
        assert!(detail.as_user().is_some());
    }

    #[test]
    fn everything_else_is_generic() {
        let doc = br#"<detail><contact callsign="poop"/><status readiness="true"/></detail>"#;
        let element = XmlElement::from_bytes(doc).unwrap();
        let detail = Detail::from_element(&element, "u", "a-u-G").unwrap();
        assert!(matches!(detail, Detail::Generic(_)));
    }

    #[test]
    fn reads_marti_destinations() {
        let doc = br#"<detail><marti><dest uid="u2"/><dest callsign="JOKER"/></marti></detail>"#;
        let element = XmlElement::from_bytes(doc).unwrap();
        let detail = Detail::from_element(&element, "u", "a-u-G").unwrap();

        assert!(detail.has_marti());
        let dests = detail.marti_dests();
        assert_eq!(dests.len(), 2);
        assert_eq!(dests[0].uid.as_deref(), Some("u2"));
        assert_eq!(dests[1].callsign.as_deref(), Some("JOKER"));
    }

    #[test]
    fn an_empty_marti_is_not_a_marti() {
        let doc = br#"<detail><marti/><remarks/></detail>"#;
        let element = XmlElement::from_bytes(doc).unwrap();
        let detail = Detail::from_element(&element, "u", "a-u-G").unwrap();
        assert!(!detail.has_marti());
        assert!(detail.marti_dests().is_empty());
    }
}
