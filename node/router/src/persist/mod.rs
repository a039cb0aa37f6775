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

mod memory;
pub use memory::*;

mod redis_store;
pub use redis_store::*;

use takyr_node_cot::Event;

use std::fmt::Debug;

/// The event-type prefixes the broker keeps for late joiners.
///
/// Atoms (positions, markers), map points, evac requests, and drawings stay;
/// chat, tasking, and transient replies do not.
pub const KEPT_EVENT_PREFIXES: [&str; 6] = ["a-", "b-m-p", "b-r-f-h-c", "u-d-c", "u-d-r", "u-d-f"];

/// A backend holding the latest event per uid, each entry expiring when the
/// event goes stale.
#[async_trait]
pub trait PersistBackend: Debug + Send + Sync {
    /// Upserts the event under its uid with a TTL derived from its stale
    /// time. An already-stale event is a no-op.
    async fn track(&self, event: &Event);

    /// Returns `true` if an entry with the given uid is tracked.
    async fn exists(&self, uid: &str) -> bool;

    /// Returns the tracked event with the given uid, if any.
    async fn get(&self, uid: &str) -> Option<Event>;

    /// Returns a snapshot of every tracked event. Entries that no longer
    /// parse are purged as a side effect and skipped.
    async fn all(&self) -> Vec<Event>;

    /// Drops entries whose stale time has passed, where the backend does not
    /// expire them itself.
    async fn prune(&self);

    /// Drops every entry, returning how many were dropped.
    async fn purge(&self) -> usize;
}

/// The persistence store: the kept-type filter in front of a backend.
#[derive(Debug)]
pub struct PersistStore {
    backend: Box<dyn PersistBackend>,
}

impl PersistStore {
    /// Initializes a store over the in-memory backend.
    pub fn memory() -> Self {
        Self { backend: Box::new(MemoryStore::new()) }
    }

    /// Initializes a store over the external key/value backend. `url` of
    /// `None` connects to the default local instance; `site` namespaces the
    /// keys.
    pub fn redis(url: Option<&str>, site: &str) -> Result<Self, redis::RedisError> {
        Ok(Self { backend: Box::new(RedisStore::new(url, site)?) })
    }

    /// Returns `true` if events of this type are kept for late joiners.
    pub fn is_kept(etype: &str) -> bool {
        KEPT_EVENT_PREFIXES.iter().any(|prefix| etype.starts_with(prefix))
    }

    /// Tracks the event if its type is kept; anything else passes through
    /// untracked.
    pub async fn update(&self, event: &Event) {
        if Self::is_kept(&event.etype) {
            self.backend.track(event).await;
        }
    }

    /// Returns `true` if an entry with the given uid is tracked.
    pub async fn exists(&self, uid: &str) -> bool {
        self.backend.exists(uid).await
    }

    /// Returns the tracked event with the given uid, if any.
    pub async fn get(&self, uid: &str) -> Option<Event> {
        self.backend.get(uid).await
    }

    /// Returns a snapshot of every tracked event.
    pub async fn all(&self) -> Vec<Event> {
        self.backend.all().await
    }

    /// Drops stale entries.
    pub async fn prune(&self) {
        self.backend.prune().await
    }

    /// Drops every entry, returning how many were dropped.
    pub async fn purge(&self) -> usize {
        self.backend.purge().await
    }
}
