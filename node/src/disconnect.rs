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

/// The reason a session was disconnected. One session dies; the process does
/// not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the connection or the socket failed.
    ClientDisconnected,
    /// The byte stream stopped being XML.
    XmlSyntaxError,
    /// The TLS handshake did not complete in time.
    HandshakeTimeout,
    /// The user's certificates were revoked while connected.
    Banned,
    /// The node is shutting down.
    ServerShutdown,
    /// Writing to the peer failed.
    WriteError,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClientDisconnected => "Client disconnected",
            Self::XmlSyntaxError => "XML Syntax Error",
            Self::HandshakeTimeout => "SSL Handshake timeout",
            Self::Banned => "Banned",
            Self::ServerShutdown => "Server shutting down",
            Self::WriteError => "Write error",
        })
    }
}
