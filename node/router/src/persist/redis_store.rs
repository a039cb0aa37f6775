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
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use takyr_node_cot::{Event, XmlElement};
use tokio::sync::Mutex;

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

/// The external persistence backend, keyed `taky:<site>:persist:<uid>` with
/// per-key expiry.
///
/// The store must not take the broker down with it: a failed operation
/// behaves as though the store were empty, and connection state changes are
/// logged once per transition rather than per operation.
pub struct RedisStore {
    client: Client,
    /// The live connection, established lazily and re-established on demand.
    conn: Mutex<Option<ConnectionManager>>,
    /// The key namespace, `taky:<site>:persist:`.
    prefix: String,
    /// The connection latch; flips once per outage and once per recovery.
    ok: AtomicBool,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").field("prefix", &self.prefix).finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Initializes the backend. `url` of `None` targets the default local
    /// instance; the connection itself is made on first use.
    pub fn new(url: Option<&str>, site: &str) -> Result<Self, RedisError> {
        let url = url.unwrap_or("redis://127.0.0.1/");
        info!("Persisting events to {url}");
        Ok(Self {
            client: Client::open(url)?,
            conn: Mutex::new(None),
            prefix: format!("taky:{site}:persist:"),
            ok: AtomicBool::new(true),
        })
    }

    fn key(&self, uid: &str) -> String {
        format!("{}{uid}", self.prefix)
    }

    /// Returns a handle to the live connection, dialing if there is none.
    async fn connection(&self) -> Option<ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            match self.client.get_connection_manager().await {
                Ok(conn) => *guard = Some(conn),
                Err(error) => {
                    debug!("Persistence store connect failed: {error}");
                    self.result(false);
                    return None;
                }
            }
        }
        guard.clone()
    }

    /// Records the outcome of an operation, logging on state transitions.
    fn result(&self, ok: bool) {
        let was_ok = self.ok.swap(ok, Ordering::Relaxed);
        if was_ok && !ok {
            warn!("Lost connection to the persistence store");
        } else if !was_ok && ok {
            info!("Connection to the persistence store restored");
        }
    }

    /// Reads and parses one key, purging it if the payload no longer parses.
    async fn read_key(&self, conn: &mut ConnectionManager, key: &str) -> Option<Event> {
        let bytes: Option<Vec<u8>> = match conn.get(key).await {
            Ok(bytes) => {
                self.result(true);
                bytes
            }
            Err(error) => {
                debug!("Persistence store read failed: {error}");
                self.result(false);
                return None;
            }
        };

        let bytes = bytes?;
        match XmlElement::from_bytes(&bytes).map_err(|e| e.to_string()).and_then(|element| {
            Event::from_element(&element).map_err(|e| e.to_string())
        }) {
            Ok(event) => Some(event),
            Err(error) => {
                warn!("Unable to parse an event from the persistence store: {error}");
                warn!("Purging key {key}");
                let _: Result<(), _> = conn.del(key).await;
                None
            }
        }
    }
}

#[async_trait]
impl PersistBackend for RedisStore {
    async fn track(&self, event: &Event) {
        let ttl = event.ttl(Utc::now());
        if ttl <= 0 {
            return;
        }
        let Some(mut conn) = self.connection().await else {
            return;
        };

        let key = self.key(&event.uid);
        match conn.set_ex::<_, _, ()>(&key, event.to_bytes(), ttl as u64).await {
            Ok(()) => {
                debug!("Tracking {key} (ttl: {ttl})");
                self.result(true);
            }
            Err(error) => {
                debug!("Persistence store write failed: {error}");
                self.result(false);
            }
        }
    }

    async fn exists(&self, uid: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        match conn.exists(self.key(uid)).await {
            Ok(exists) => {
                self.result(true);
                exists
            }
            Err(error) => {
                debug!("Persistence store read failed: {error}");
                self.result(false);
                false
            }
        }
    }

    async fn get(&self, uid: &str) -> Option<Event> {
        let mut conn = self.connection().await?;
        self.read_key(&mut conn, &self.key(uid)).await
    }

    async fn all(&self) -> Vec<Event> {
        let Some(mut conn) = self.connection().await else {
            return Vec::new();
        };

        let keys: Vec<String> = match conn.keys(format!("{}*", self.prefix)).await {
            Ok(keys) => {
                self.result(true);
                keys
            }
            Err(error) => {
                debug!("Persistence store scan failed: {error}");
                self.result(false);
                return Vec::new();
            }
        };

        let mut events = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(event) = self.read_key(&mut conn, &key).await {
                events.push(event);
            }
        }
        events
    }

    async fn prune(&self) {
        // The store expires keys itself.
    }

    async fn purge(&self) -> usize {
        let Some(mut conn) = self.connection().await else {
            return 0;
        };

        let keys: Vec<String> = match conn.keys(format!("{}*", self.prefix)).await {
            Ok(keys) => keys,
            Err(error) => {
                debug!("Persistence store scan failed: {error}");
                self.result(false);
                return 0;
            }
        };

        let mut purged = 0;
        for key in &keys {
            match conn.del::<_, ()>(key).await {
                Ok(()) => purged += 1,
                Err(error) => {
                    debug!("Persistence store delete failed: {error}");
                    self.result(false);
                    return purged;
                }
            }
        }
        self.result(true);
        purged
    }
}
