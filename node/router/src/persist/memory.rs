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

use super::PersistBackend;

use chrono::Utc;
use parking_lot::RwLock;
use takyr_node_cot::Event;

use std::collections::HashMap;

/// The in-memory persistence backend: a map of uid to the latest event,
/// swept of stale entries on `prune`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<String, Event>>,
}

impl MemoryStore {
    /// Initializes a new in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistBackend for MemoryStore {
    async fn track(&self, event: &Event) {
        let ttl = event.ttl(Utc::now());
        if ttl <= 0 {
            return;
        }

        let mut events = self.events.write();
        match events.insert(event.uid.clone(), event.clone()) {
            Some(_) => debug!("Updating tracking for: {} (ttl: {ttl})", event.uid),
            None => debug!("New item to track: {} (ttl: {ttl})", event.uid),
        }
    }

    async fn exists(&self, uid: &str) -> bool {
        let now = Utc::now();
        self.events.read().get(uid).is_some_and(|event| event.stale > now)
    }

    async fn get(&self, uid: &str) -> Option<Event> {
        let now = Utc::now();
        self.events.read().get(uid).filter(|event| event.stale > now).cloned()
    }

    async fn all(&self) -> Vec<Event> {
        let now = Utc::now();
        self.events.read().values().filter(|event| event.stale > now).cloned().collect()
    }

    async fn prune(&self) {
        let now = Utc::now();
        self.events.write().retain(|uid, event| {
            let fresh = event.stale > now;
            if !fresh {
                debug!("Pruning {uid}, stale was {}", event.stale);
            }
            fresh
        });
    }

    async fn purge(&self) -> usize {
        let mut events = self.events.write();
        let purged = events.len();
        events.clear();
        purged
    }
}
