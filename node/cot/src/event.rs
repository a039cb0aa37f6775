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

use crate::{detail::Detail, errors::UnmarshalError, point::Point, xml::XmlElement};

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// The event type of a ping.
pub const PING_TYPE: &str = "t-x-c-t";
/// The event type of a ping reply.
pub const PONG_TYPE: &str = "t-x-c-t-r";
/// The uid pings are answered with.
pub const PONG_UID: &str = "takPong";
/// How long a ping reply stays fresh.
pub const PONG_STALE_SECS: i64 = 20;

/// A single CoT message: identity, type, timestamps, location, and an
/// optional detail payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// The CoT schema version, typically `2.0`.
    pub version: String,
    /// The primary identity of the thing this event describes.
    pub uid: String,
    /// The dotted event type, e.g. `a-f-G-U-C`.
    pub etype: String,
    /// How the event was generated, e.g. `m-g`.
    pub how: String,
    pub time: DateTime<Utc>,
    pub start: DateTime<Utc>,
    /// When the event expires. Persistence derives its TTL from this.
    pub stale: DateTime<Utc>,
    pub point: Point,
    pub detail: Option<Detail>,
}

impl Event {
    /// Reads an event from an `<event>` element.
    pub fn from_element(element: &XmlElement) -> Result<Self, UnmarshalError> {
        if element.name() != "event" {
            return Err(UnmarshalError::NotAnEvent(element.name().to_string()));
        }

        let uid = required_attr(element, "uid")?.to_string();
        let etype = required_attr(element, "type")?.to_string();

        let time = parse_timestamp(element, "time")?;
        let start = parse_timestamp(element, "start")?;
        let stale = parse_timestamp(element, "stale")?;

        let point = match element.child("point") {
            Some(child) => Point::from_element(child)?,
            None => Point::default(),
        };
        let detail = match element.child("detail") {
            Some(child) => Some(Detail::from_element(child, &uid, &etype)?),
            None => None,
        };

        Ok(Self {
            version: element.attr("version").unwrap_or("2.0").to_string(),
            uid,
            etype,
            how: element.attr("how").unwrap_or_default().to_string(),
            time,
            start,
            stale,
            point,
            detail,
        })
    }

    /// Renders the event as an `<event>` element. Detail payloads round-trip
    /// their original element tree verbatim.
    pub fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("event");
        element.set_attr("version", self.version.clone());
        element.set_attr("uid", self.uid.clone());
        element.set_attr("type", self.etype.clone());
        element.set_attr("how", self.how.clone());
        element.set_attr("time", format_timestamp(self.time));
        element.set_attr("start", format_timestamp(self.start));
        element.set_attr("stale", format_timestamp(self.stale));
        element.push_child(self.point.to_element());
        if let Some(detail) = &self.detail {
            element.push_child(detail.element().clone());
        }
        element
    }

    /// Renders the event as wire bytes, with no XML declaration.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_element().to_bytes()
    }

    /// Returns `true` if this event is a ping.
    pub fn is_ping(&self) -> bool {
        self.etype == PING_TYPE
    }

    /// Returns `true` if this event is an atom (type prefix `a`).
    pub fn is_atom(&self) -> bool {
        self.etype.starts_with('a')
    }

    /// Builds the reply to a ping.
    pub fn pong(now: DateTime<Utc>) -> Self {
        Self {
            version: "2.0".to_string(),
            uid: PONG_UID.to_string(),
            etype: PONG_TYPE.to_string(),
            how: "h-g-i-g-o".to_string(),
            time: now,
            start: now,
            stale: now + Duration::seconds(PONG_STALE_SECS),
            point: Point::default(),
            detail: None,
        }
    }

    /// Returns the number of whole seconds until the event goes stale.
    pub fn ttl(&self, now: DateTime<Utc>) -> i64 {
        let millis = (self.stale - now).num_milliseconds();
        (millis as f64 / 1000.0).round() as i64
    }

    /// Caps the stale time at `now + max_ttl` seconds.
    pub fn clamp_stale(&mut self, max_ttl: i64, now: DateTime<Utc>) {
        let cap = now + Duration::seconds(max_ttl);
        if self.stale > cap {
            self.stale = cap;
        }
    }
}

fn required_attr<'a>(element: &'a XmlElement, attribute: &'static str) -> Result<&'a str, UnmarshalError> {
    match element.attr(attribute) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(UnmarshalError::MissingAttribute { tag: "event", attribute }),
    }
}

fn parse_timestamp(element: &XmlElement, attribute: &'static str) -> Result<DateTime<Utc>, UnmarshalError> {
    let value = element
        .attr(attribute)
        .ok_or(UnmarshalError::MissingAttribute { tag: "event", attribute })?;
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| UnmarshalError::InvalidTimestamp(value.to_string()))
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
