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
extern crate async_trait;
#[macro_use]
extern crate tracing;

mod persist;
pub use persist::*;

use bytes::Bytes;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use takyr_node_cot::{ChatDestination, Event, Teams};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// How often, at most, the persistence store is swept of stale entries.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(10);

/// The router's view of a connected session.
///
/// The connection layer owns the sockets; the router only needs identity and
/// a way to queue outbound frames. Queuing must not block: a slow peer is the
/// session's problem, not the router's.
pub trait SessionHandle: Send + Sync {
    /// A registry-stable session id.
    fn id(&self) -> u64;

    /// The uid of the identified user, if the session has identified.
    fn uid(&self) -> Option<String>;

    /// The callsign of the identified user, if any.
    fn callsign(&self) -> Option<String>;

    /// The team of the identified user, if any.
    fn team(&self) -> Option<Teams>;

    /// Whether this is a read-mostly monitor session.
    fn is_monitor(&self) -> bool;

    /// Queues a frame for delivery. Returns `false` if the session is gone.
    fn send(&self, frame: Bytes) -> bool;
}

/// The policy that maps an (origin, event) pair onto a destination set.
///
/// The router owns the session registry and the persistence store. Route
/// decisions take the first match of: chat destination, marti destinations,
/// broadcast. Only the broadcast path feeds the persistence store, and only
/// kept event types stick.
pub struct Router {
    /// The connected sessions, by session id.
    sessions: RwLock<IndexMap<u64, Arc<dyn SessionHandle>>>,
    /// The persistence store.
    persist: PersistStore,
    /// The cap on event freshness, in seconds. Negative disables the cap.
    max_persist_ttl: i64,
    /// When the store was last swept.
    last_prune: Mutex<Option<Instant>>,
}

impl Router {
    /// Initializes a router over the given persistence store.
    pub fn new(persist: PersistStore, max_persist_ttl: i64) -> Self {
        Self {
            sessions: Default::default(),
            persist,
            max_persist_ttl,
            last_prune: Default::default(),
        }
    }

    /// Returns a reference to the persistence store.
    pub fn persist(&self) -> &PersistStore {
        &self.persist
    }

    /// Adds a session to the registry.
    pub fn register(&self, session: Arc<dyn SessionHandle>) {
        self.sessions.write().insert(session.id(), session);
    }

    /// Removes a session from the registry.
    pub fn deregister(&self, session_id: u64) {
        self.sessions.write().shift_remove(&session_id);
    }

    /// Returns a snapshot of the connected sessions.
    pub fn sessions(&self) -> Vec<Arc<dyn SessionHandle>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Returns every session identified with the given uid.
    pub fn find_by_uid(&self, uid: &str) -> Vec<Arc<dyn SessionHandle>> {
        self.sessions
            .read()
            .values()
            .filter(|session| session.uid().as_deref() == Some(uid))
            .cloned()
            .collect()
    }

    /// Returns every session identified with the given callsign.
    pub fn find_by_callsign(&self, callsign: &str) -> Vec<Arc<dyn SessionHandle>> {
        self.sessions
            .read()
            .values()
            .filter(|session| session.callsign().as_deref() == Some(callsign))
            .cloned()
            .collect()
    }

    /// Routes one event from the given origin session.
    pub async fn route(&self, origin: &dyn SessionHandle, event: &mut Event) {
        // Cap the freshness before the event goes anywhere.
        if self.max_persist_ttl >= 0 {
            event.clamp_stale(self.max_persist_ttl, Utc::now());
        }

        // Monitor sessions listen; they do not originate.
        if origin.is_monitor() {
            return;
        }

        if let Some(chat) = event.detail.as_ref().and_then(|detail| detail.as_chat()) {
            let frame = Bytes::from(event.to_bytes());
            match chat.dst.clone() {
                ChatDestination::Broadcast => self.send_all_except(origin.id(), frame),
                ChatDestination::Team(team) => self.send_team(origin.id(), team, frame),
                ChatDestination::User(uid) => {
                    for session in self.find_by_uid(&uid) {
                        session.send(frame.clone());
                    }
                }
            }
            return;
        }

        if event.detail.as_ref().is_some_and(|detail| detail.has_marti()) {
            self.send_marti(event);
            return;
        }

        // Broadcast: stick the event first, then fan it out.
        self.persist.update(event).await;
        self.send_all_except(origin.id(), Bytes::from(event.to_bytes()));
    }

    /// Delivers the persisted world view to a session, skipping the event
    /// that describes the session's own user.
    pub async fn send_persist(&self, session: &dyn SessionHandle) {
        let own_uid = session.uid();
        for event in self.persist.all().await {
            if own_uid.as_deref() == Some(event.uid.as_str()) {
                continue;
            }
            session.send(Bytes::from(event.to_bytes()));
        }
    }

    /// Sweeps the persistence store of stale entries, at most once per
    /// `PRUNE_INTERVAL` across all callers.
    pub async fn prune(&self) {
        {
            let mut last_prune = self.last_prune.lock();
            if last_prune.is_some_and(|at| at.elapsed() < PRUNE_INTERVAL) {
                return;
            }
            *last_prune = Some(Instant::now());
        }
        self.persist.prune().await;
    }

    /// Empties the persistence store, returning how many entries dropped.
    pub async fn purge_persist(&self) -> usize {
        self.persist.purge().await
    }

    fn send_all_except(&self, origin_id: u64, frame: Bytes) {
        for session in self.sessions.read().values() {
            if session.id() != origin_id {
                session.send(frame.clone());
            }
        }
    }

    fn send_team(&self, origin_id: u64, team: Teams, frame: Bytes) {
        for session in self.sessions.read().values() {
            if session.id() != origin_id && session.team() == Some(team) {
                session.send(frame.clone());
            }
        }
    }

    /// Delivers to each marti destination, preferring uid matches over
    /// callsign matches. Destinations that resolve to no session are dropped;
    /// a marti event never falls back to broadcast.
    fn send_marti(&self, event: &Event) {
        let Some(detail) = event.detail.as_ref() else {
            return;
        };
        let frame = Bytes::from(event.to_bytes());
        let mut delivered = indexmap::IndexSet::new();

        for dest in detail.marti_dests() {
            let matches = match (&dest.uid, &dest.callsign) {
                (Some(uid), _) => self.find_by_uid(uid),
                (None, Some(callsign)) => self.find_by_callsign(callsign),
                (None, None) => Vec::new(),
            };
            if matches.is_empty() {
                debug!("Dropping a marti destination with no session: {dest:?}");
            }
            for session in matches {
                if delivered.insert(session.id()) {
                    session.send(frame.clone());
                }
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("num_sessions", &self.sessions.read().len())
            .field("max_persist_ttl", &self.max_persist_ttl)
            .finish_non_exhaustive()
    }
}
