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

/// An error raised while converting an XML element into a CoT value.
///
/// These errors are event-local: the offending event is logged and skipped,
/// and the stream continues.
#[derive(Debug, thiserror::Error)]
pub enum UnmarshalError {
    #[error("cannot create an event from <{0}>")]
    NotAnEvent(String),
    #[error("missing attribute '{attribute}' on <{tag}>")]
    MissingAttribute { tag: &'static str, attribute: &'static str },
    #[error("invalid attribute '{attribute}' on <{tag}>: '{value}'")]
    InvalidAttribute { tag: &'static str, attribute: &'static str, value: String },
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("detail does not contain a geochat payload")]
    NotAGeoChat,
}

/// An error raised while rendering a CoT value as XML.
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("missing field '{0}', unable to render an identity detail")]
    MissingUserField(&'static str),
}
