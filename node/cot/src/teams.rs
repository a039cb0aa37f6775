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

use std::fmt;

/// The closed set of TAK team names.
///
/// Group membership scopes team chat. Names the clients send that fall
/// outside this set coerce to `Unknown` rather than failing the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Teams {
    Cyan,
    Yellow,
    Red,
    Green,
    Blue,
    Orange,
    Magenta,
    White,
    Maroon,
    Purple,
    DarkBlue,
    Teal,
    DarkGreen,
    Brown,
    Unknown,
}

impl Teams {
    /// Returns the display name the clients use on the wire.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cyan => "Cyan",
            Self::Yellow => "Yellow",
            Self::Red => "Red",
            Self::Green => "Green",
            Self::Blue => "Blue",
            Self::Orange => "Orange",
            Self::Magenta => "Magenta",
            Self::White => "White",
            Self::Maroon => "Maroon",
            Self::Purple => "Purple",
            Self::DarkBlue => "Dark Blue",
            Self::Teal => "Teal",
            Self::DarkGreen => "Dark Green",
            Self::Brown => "Brown",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl From<&str> for Teams {
    fn from(name: &str) -> Self {
        match name {
            "Cyan" => Self::Cyan,
            "Yellow" => Self::Yellow,
            "Red" => Self::Red,
            "Green" => Self::Green,
            "Blue" => Self::Blue,
            "Orange" => Self::Orange,
            "Magenta" => Self::Magenta,
            "White" => Self::White,
            "Maroon" => Self::Maroon,
            "Purple" => Self::Purple,
            "Dark Blue" => Self::DarkBlue,
            "Teal" => Self::Teal,
            "Dark Green" => Self::DarkGreen,
            "Brown" => Self::Brown,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Teams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
