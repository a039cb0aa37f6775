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
    errors::{MarshalError, UnmarshalError},
    teams::Teams,
    xml::XmlElement,
};

/// The tag set that identifies a self-description detail.
pub(crate) const TAKUSER_TAGS: [&str; 3] = ["takv", "contact", "__group"];

/// The device block of a self-description (`<takv>`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TakDevice {
    pub os: Option<String>,
    pub version: Option<String>,
    pub device: Option<String>,
    pub platform: Option<String>,
}

impl TakDevice {
    /// Reads the device block from a `<takv>` element.
    pub fn from_element(element: &XmlElement) -> Self {
        Self {
            os: element.attr("os").map(str::to_string),
            version: element.attr("version").map(str::to_string),
            device: element.attr("device").map(str::to_string),
            platform: element.attr("platform").map(str::to_string),
        }
    }

    /// Renders the device block as a `<takv>` element.
    pub fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("takv");
        element.set_attr("os", self.os.clone().unwrap_or_default());
        element.set_attr("device", self.device.clone().unwrap_or_default());
        element.set_attr("version", self.version.clone().unwrap_or_default());
        element.set_attr("platform", self.platform.clone().unwrap_or_default());
        element
    }
}

/// The identity a client announces about itself: callsign, team, role,
/// reachability, and the device it runs on.
///
/// The uid and marker are inherited from the enclosing event rather than the
/// detail payload. A session adopts the first one it sees and updates it in
/// place on subsequent announcements bearing the same uid.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TakUser {
    pub uid: String,
    pub callsign: Option<String>,
    /// The event type of the announcing event, e.g. `a-f-G-U-C`.
    pub marker: Option<String>,
    pub group: Option<Teams>,
    pub role: Option<String>,
    pub phone: Option<String>,
    pub xmpp: Option<String>,
    pub endpoint: Option<String>,
    pub course: Option<f64>,
    pub speed: Option<f64>,
    pub battery: Option<String>,
    pub device: TakDevice,
}

impl TakUser {
    /// Reads a self-description from a `<detail>` element. The `uid` and
    /// `marker` come from the enclosing event.
    pub fn from_element(element: &XmlElement, uid: &str, marker: &str) -> Result<Self, UnmarshalError> {
        let mut user = Self { uid: uid.to_string(), marker: Some(marker.to_string()), ..Default::default() };

        for child in element.children() {
            match child.name() {
                "takv" => user.device = TakDevice::from_element(child),
                "contact" => {
                    user.callsign = child.attr("callsign").map(str::to_string);
                    user.phone = child.attr("phone").map(str::to_string);
                    user.xmpp = child.attr("xmppUsername").map(str::to_string);
                    user.endpoint = child.attr("endpoint").map(str::to_string);
                }
                "__group" => {
                    user.group = Some(Teams::from(child.attr("name").unwrap_or_default()));
                    user.role = child.attr("role").map(str::to_string);
                }
                "status" => user.battery = child.attr("battery").map(str::to_string),
                "track" => {
                    user.course = Some(parse_track(child, "course")?);
                    user.speed = Some(parse_track(child, "speed")?);
                }
                _ => (),
            }
        }

        Ok(user)
    }

    /// Renders the identity as a `<detail>` element.
    ///
    /// Used when the broker has to speak for the user (persistence snapshots
    /// of synthesized identities); announcements received on the wire keep
    /// their original payload instead.
    pub fn to_element(&self) -> Result<XmlElement, MarshalError> {
        let callsign = self.callsign.as_deref().ok_or(MarshalError::MissingUserField("callsign"))?;
        let group = self.group.ok_or(MarshalError::MissingUserField("group"))?;
        let role = self.role.as_deref().ok_or(MarshalError::MissingUserField("role"))?;
        let endpoint = self.endpoint.as_deref().ok_or(MarshalError::MissingUserField("endpoint"))?;

        let mut detail = XmlElement::new("detail");
        detail.push_child(self.device.to_element());

        if let Some(battery) = &self.battery {
            let mut status = XmlElement::new("status");
            status.set_attr("battery", battery.clone());
            detail.push_child(status);
        }

        let mut droid = XmlElement::new("uid");
        droid.set_attr("Droid", callsign);
        detail.push_child(droid);

        let mut contact = XmlElement::new("contact");
        contact.set_attr("callsign", callsign);
        contact.set_attr("endpoint", endpoint);
        if let Some(phone) = &self.phone {
            contact.set_attr("phone", phone.clone());
        }
        if let Some(xmpp) = &self.xmpp {
            contact.set_attr("xmppUsername", xmpp.clone());
        }
        detail.push_child(contact);

        let mut group_element = XmlElement::new("__group");
        group_element.set_attr("role", role);
        group_element.set_attr("name", group.name());
        detail.push_child(group_element);

        if let (Some(course), Some(speed)) = (self.course, self.speed) {
            let mut track = XmlElement::new("track");
            track.set_attr("course", format!("{course:.1}"));
            track.set_attr("speed", format!("{speed:.1}"));
            detail.push_child(track);
        }

        Ok(detail)
    }
}

fn parse_track(element: &XmlElement, attribute: &'static str) -> Result<f64, UnmarshalError> {
    let value = element
        .attr(attribute)
        .ok_or(UnmarshalError::MissingAttribute { tag: "track", attribute })?;
    value.parse().map_err(|_| UnmarshalError::InvalidAttribute {
        tag: "track",
        attribute,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL: &[u8] = br#"<detail><takv os="29" version="4.0.0.0 (deadbeef).1234567890-CIV" device="Some Android Device" platform="ATAK-CIV"/><contact xmppUsername="xmpp@host.com" endpoint="*:-1:stcp" callsign="JENNY"/><uid Droid="JENNY"/><precisionlocation altsrc="GPS" geopointsrc="GPS"/><__group role="Team Member" name="Cyan"/><status battery="78"/><track course="80.24833892285461" speed="0.0"/></detail>"#;

    #[test]
    fn reads_a_self_description() {
        let element = XmlElement::from_bytes(DETAIL).unwrap();
        let user = TakUser::from_element(&element, "ANDROID-deadbeef", "a-f-G-U-C").unwrap();

        assert_eq!(user.uid, "ANDROID-deadbeef");
        assert_eq!(user.callsign.as_deref(), Some("JENNY"));
        assert_eq!(user.marker.as_deref(), Some("a-f-G-U-C"));
        assert_eq!(user.group, Some(Teams::Cyan));
        assert_eq!(user.role.as_deref(), Some("Team Member"));
        assert_eq!(user.endpoint.as_deref(), Some("*:-1:stcp"));
        assert_eq!(user.xmpp.as_deref(), Some("xmpp@host.com"));
        assert_eq!(user.battery.as_deref(), Some("78"));
        assert_eq!(user.device.os.as_deref(), Some("29"));
        assert_eq!(user.device.device.as_deref(), Some("Some Android Device"));
        assert!((user.course.unwrap() - 80.24833892285461).abs() < 1e-9);
    }

    #[test]
    fn rejects_malformed_track_attributes() {
        let element =
            XmlElement::from_bytes(br#"<detail><track course="north" speed="0.0"/></detail>"#)
                .unwrap();
        assert!(matches!(
            TakUser::from_element(&element, "x", "a-f-G"),
            Err(UnmarshalError::InvalidAttribute { tag: "track", .. })
        ));
    }

    #[test]
    fn renders_a_synthesized_identity() {
        let element = XmlElement::from_bytes(DETAIL).unwrap();
        let user = TakUser::from_element(&element, "ANDROID-deadbeef", "a-f-G-U-C").unwrap();
        let rendered = user.to_element().unwrap();

        assert_eq!(rendered.child("contact").unwrap().attr("callsign"), Some("JENNY"));
        assert_eq!(rendered.child("__group").unwrap().attr("name"), Some("Cyan"));
        assert_eq!(rendered.child("status").unwrap().attr("battery"), Some("78"));
        assert_eq!(rendered.child("track").unwrap().attr("course"), Some("80.2"));
    }

    #[test]
    fn refuses_to_render_an_incomplete_identity() {
        let user = TakUser { uid: "x".into(), ..Default::default() };
        assert!(matches!(user.to_element(), Err(MarshalError::MissingUserField("callsign"))));
    }
}
