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

#![allow(dead_code)]

use bytes::Bytes;
use chrono::{Duration, SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use takyr_node_cot::{Event, Teams, XmlElement};
use takyr_node_router::SessionHandle;

use std::sync::Arc;

/// A channelless stand-in for a connected client: identity plus an outbox
/// the tests can drain.
pub struct TestSession {
    id: u64,
    monitor: bool,
    user: RwLock<Option<(String, String, Teams)>>,
    outbox: Mutex<Vec<Bytes>>,
}

impl TestSession {
    pub fn anonymous(id: u64) -> Arc<Self> {
        Arc::new(Self { id, monitor: false, user: RwLock::new(None), outbox: Default::default() })
    }

    pub fn identified(id: u64, uid: &str, callsign: &str, team: Teams) -> Arc<Self> {
        let session = Self::anonymous(id);
        *session.user.write() = Some((uid.to_string(), callsign.to_string(), team));
        session
    }

    pub fn monitor(id: u64) -> Arc<Self> {
        Arc::new(Self { id, monitor: true, user: RwLock::new(None), outbox: Default::default() })
    }

    /// Drains and parses everything queued for this session.
    pub fn take(&self) -> Vec<Event> {
        self.outbox
            .lock()
            .drain(..)
            .map(|frame| {
                let element = XmlElement::from_bytes(&frame).expect("queued frame parses");
                Event::from_element(&element).expect("queued frame is an event")
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.outbox.lock().is_empty()
    }
}

impl SessionHandle for TestSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn uid(&self) -> Option<String> {
        self.user.read().as_ref().map(|(uid, _, _)| uid.clone())
    }

    fn callsign(&self) -> Option<String> {
        self.user.read().as_ref().map(|(_, callsign, _)| callsign.clone())
    }

    fn team(&self) -> Option<Teams> {
        self.user.read().as_ref().map(|(_, _, team)| *team)
    }

    fn is_monitor(&self) -> bool {
        self.monitor
    }

    fn send(&self, frame: Bytes) -> bool {
        self.outbox.lock().push(frame);
        true
    }
}

/// Builds an event of the given type, stale `stale_secs` from now, with an
/// optional raw `<detail>` payload.
pub fn event(uid: &str, etype: &str, stale_secs: i64, detail: Option<&str>) -> Event {
    let now = Utc::now();
    let doc = format!(
        r#"<event version="2.0" uid="{uid}" type="{etype}" how="m-g" time="{t}" start="{t}" stale="{s}"><point lat="1.234567" lon="-3.141592" hae="0.0" ce="9999999.0" le="9999999.0"/>{detail}</event>"#,
        t = now.to_rfc3339_opts(SecondsFormat::Millis, true),
        s = (now + Duration::seconds(stale_secs)).to_rfc3339_opts(SecondsFormat::Millis, true),
        detail = detail.unwrap_or_default(),
    );
    Event::from_element(&XmlElement::from_bytes(doc.as_bytes()).expect("fixture parses"))
        .expect("fixture is an event")
}

/// Builds a direct or broadcast chat event from `src` to the given chat id.
pub fn chat_event(src_uid: &str, src_cs: &str, chatroom: &str, dst_id: &str) -> Event {
    let detail = format!(
        r#"<detail><__chat parent="RootContactGroup" groupOwner="false" chatroom="{chatroom}" id="{dst_id}" senderCallsign="{src_cs}"><chatgrp uid0="{src_uid}" uid1="{dst_id}" id="{dst_id}"/></__chat><link uid="{src_uid}" type="a-f-G-U-C" relation="p-p"/><remarks source="BAO.F.ATAK.{src_uid}" to="{dst_id}">hello</remarks></detail>"#
    );
    event(&format!("GeoChat.{src_uid}.{dst_id}"), "b-t-f", 86_400, Some(&detail))
}

/// Builds a team-scoped chat event from `src`.
pub fn team_chat_event(src_uid: &str, src_cs: &str, team: Teams) -> Event {
    let name = team.name();
    let detail = format!(
        r#"<detail><__chat parent="TeamGroups" groupOwner="false" chatroom="{name}" id="{name}" senderCallsign="{src_cs}"><chatgrp uid0="{src_uid}" uid1="{name}" id="{name}"/></__chat><link uid="{src_uid}" type="a-f-G-U-C" relation="p-p"/><remarks source="BAO.F.ATAK.{src_uid}" to="{name}">rally up</remarks></detail>"#
    );
    event(&format!("GeoChat.{src_uid}.{name}"), "b-t-f", 86_400, Some(&detail))
}
