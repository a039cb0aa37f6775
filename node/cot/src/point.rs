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

use crate::{errors::UnmarshalError, xml::XmlElement};

/// The sentinel for an unknown circular or linear error, in meters.
pub const UNKNOWN_ERROR: f64 = 9_999_999.0;

/// A CoT point: WGS84 coordinates plus height and error estimates.
///
/// `hae` is height above the ellipsoid; `ce` and `le` are the circular and
/// linear error estimates. All units other than degrees are meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
    pub hae: f64,
    pub ce: f64,
    pub le: f64,
}

impl Default for Point {
    fn default() -> Self {
        Self { lat: 0.0, lon: 0.0, hae: 0.0, ce: UNKNOWN_ERROR, le: UNKNOWN_ERROR }
    }
}

impl Point {
    /// Reads a point from a `<point>` element.
    pub fn from_element(element: &XmlElement) -> Result<Self, UnmarshalError> {
        Ok(Self {
            lat: parse_coord(element, "lat")?,
            lon: parse_coord(element, "lon")?,
            hae: parse_coord(element, "hae")?,
            ce: parse_coord(element, "ce")?,
            le: parse_coord(element, "le")?,
        })
    }

    /// Renders the point as a `<point>` element.
    pub fn to_element(&self) -> XmlElement {
        let mut element = XmlElement::new("point");
        element.set_attr("lat", format!("{:.6}", self.lat));
        element.set_attr("lon", format!("{:.6}", self.lon));
        element.set_attr("hae", format!("{:.1}", self.hae));
        element.set_attr("ce", format!("{:.1}", self.ce));
        element.set_attr("le", format!("{:.1}", self.le));
        element
    }
}

fn parse_coord(element: &XmlElement, attribute: &'static str) -> Result<f64, UnmarshalError> {
    let value = element
        .attr(attribute)
        .ok_or(UnmarshalError::MissingAttribute { tag: "point", attribute })?;
    value.parse().map_err(|_| UnmarshalError::InvalidAttribute {
        tag: "point",
        attribute,
        value: value.to_string(),
    })
}
