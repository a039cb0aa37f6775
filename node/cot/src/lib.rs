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

#![forbid(unsafe_code)]

#[macro_use]
extern crate tracing;

mod codec;
pub use codec::*;

mod detail;
pub use detail::*;

mod errors;
pub use errors::*;

mod event;
pub use event::*;

mod geochat;
pub use geochat::*;

mod point;
pub use point::*;

mod takuser;
pub use takuser::*;

mod teams;
pub use teams::*;

mod xml;
pub use xml::*;
