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

use crate::{disconnect::DisconnectReason, tls::PeerIdentity, transcript::Transcript};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use takyr_node_cot::{CotDecoder, Detail, Event, TakUser, Teams};
use takyr_node_router::{Router, SessionHandle};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};

use std::{
    fmt,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// How much to pull off the socket per read.
const RECV_BUFFER_SIZE: usize = 4096;

/// One connected client: its identity, counters, transcript, and outbound
/// queue.
///
/// The session lives from accept to socket close and is registered with the
/// router throughout. Its `user` starts absent and binds on the first
/// self-description the client sends.
pub struct Session {
    id: u64,
    addr: SocketAddr,
    /// Monitor sessions listen without originating routed events.
    monitor: bool,
    connected_at: DateTime<Utc>,
    /// The identified user, absent until the first self-description.
    user: RwLock<Option<TakUser>>,
    /// How many events this session has sent.
    num_rx: AtomicU64,
    last_rx: RwLock<Option<DateTime<Utc>>>,
    /// The outbound queue, drained by the session's writer task.
    outbound: mpsc::UnboundedSender<Bytes>,
    /// The peer certificate identity, when the listener does TLS.
    peer: Option<PeerIdentity>,
    transcript: Mutex<Transcript>,
    /// Cancelled to tear the session down.
    cancel: CancellationToken,
    /// The first disconnect reason wins.
    reason: Mutex<Option<DisconnectReason>>,
}

impl Session {
    /// Initializes a session and the receiver its writer task drains.
    pub fn new(
        id: u64,
        addr: SocketAddr,
        monitor: bool,
        peer: Option<PeerIdentity>,
        transcript_dir: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (outbound, outbox) = mpsc::unbounded_channel();
        let name = match monitor {
            true => format!("monitor-{}", addr.ip()),
            false => format!("anonymous-{}", addr.ip()),
        };
        let session = Arc::new(Self {
            id,
            addr,
            monitor,
            connected_at: Utc::now(),
            user: RwLock::new(None),
            num_rx: AtomicU64::new(0),
            last_rx: RwLock::new(None),
            outbound,
            peer,
            transcript: Mutex::new(Transcript::new(transcript_dir, &name)),
            cancel,
            reason: Mutex::new(None),
        });
        (session, outbox)
    }

    /// Requests a teardown. The first reason recorded wins; the reader and
    /// writer tasks observe the cancellation and exit.
    pub fn disconnect(&self, reason: DisconnectReason) {
        self.reason.lock().get_or_insert(reason);
        self.cancel.cancel();
    }

    /// Returns the recorded disconnect reason, if any.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        *self.reason.lock()
    }

    /// Returns the peer certificate identity, if one was presented.
    pub fn peer(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref()
    }

    /// Returns a copy of the identified user, if any.
    pub fn user(&self) -> Option<TakUser> {
        self.user.read().clone()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_monitor_session(&self) -> bool {
        self.monitor
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn num_rx(&self) -> u64 {
        self.num_rx.load(Ordering::Relaxed)
    }

    pub fn last_rx(&self) -> Option<DateTime<Utc>> {
        *self.last_rx.read()
    }

    /// Queues one event for this session.
    pub fn send_event(&self, event: &Event) -> bool {
        self.send(Bytes::from(event.to_bytes()))
    }

    /// Closes the transcript file.
    pub fn close_transcript(&self) {
        self.transcript.lock().close();
    }

    /// Drives the receive path until the peer goes away, the stream breaks,
    /// or the session is torn down. Returns why.
    pub async fn recv_loop(
        self: Arc<Self>,
        reader: impl AsyncRead + Unpin + Send,
        router: Arc<Router>,
    ) -> DisconnectReason {
        let mut framed =
            FramedRead::with_capacity(reader, CotDecoder::new(), RECV_BUFFER_SIZE);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return self.disconnect_reason().unwrap_or(DisconnectReason::ServerShutdown);
                }
                next = framed.next() => match next {
                    None => return DisconnectReason::ClientDisconnected,
                    Some(Err(error)) if error.kind() == std::io::ErrorKind::InvalidData => {
                        warn!("{self}: {error}");
                        return DisconnectReason::XmlSyntaxError;
                    }
                    Some(Err(error)) => {
                        info!("{self}: read failed: {error}");
                        return DisconnectReason::ClientDisconnected;
                    }
                    Some(Ok(element)) => self.handle_element(element, &router).await,
                },
            }
        }
    }

    /// Drains the outbound queue onto the socket. Frames queued before the
    /// session was ready or after the peer is gone are dropped with it.
    pub async fn send_loop(
        self: Arc<Self>,
        mut writer: impl AsyncWrite + Unpin + Send,
        mut outbox: mpsc::UnboundedReceiver<Bytes>,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = outbox.recv() => match frame {
                    None => break,
                    Some(frame) => {
                        if let Err(error) = writer.write_all(&frame).await {
                            info!("{self}: write failed: {error}");
                            self.disconnect(DisconnectReason::WriteError);
                            break;
                        }
                    }
                },
            }
        }
        let _ = writer.shutdown().await;
    }

    /// The per-event receive path: count it, decode it, answer pings, bind
    /// identity, route, and append to the transcript.
    async fn handle_element(&self, element: takyr_node_cot::XmlElement, router: &Arc<Router>) {
        self.num_rx.fetch_add(1, Ordering::Relaxed);
        *self.last_rx.write() = Some(Utc::now());

        let bytes = element.to_bytes();
        let mut event = match Event::from_element(&element) {
            Ok(event) => event,
            Err(error) => {
                info!("{self}: unable to parse an event: {error}");
                self.transcript.lock().log_error(&bytes, &error.to_string());
                return;
            }
        };

        // Pings are answered to the sender alone, and never logged.
        if event.is_ping() {
            self.send_event(&Event::pong(Utc::now()));
            return;
        }

        if event.is_atom() && !self.monitor {
            if let Some(Detail::TakUser { user, .. }) = &event.detail {
                self.identify(user.clone(), router).await;
            }
        }

        router.route(self, &mut event).await;
        self.transcript.lock().log_event(&bytes);
    }

    /// Binds or refreshes the session identity. The first self-description
    /// installs the user and triggers the persistence snapshot; later ones
    /// update in place when the uid matches and are ignored otherwise.
    async fn identify(&self, user: TakUser, router: &Arc<Router>) {
        let first_ident = {
            let mut guard = self.user.write();
            match guard.as_mut() {
                None => {
                    let name = format!(
                        "{}-{}",
                        user.uid,
                        user.callsign.clone().unwrap_or_default()
                    );
                    self.transcript.lock().set_name(&name);
                    *guard = Some(user);
                    true
                }
                Some(existing) if existing.uid == user.uid => {
                    *existing = user;
                    false
                }
                Some(existing) => {
                    warn!(
                        "{self}: ignoring a self-description for '{}'; session is bound to '{}'",
                        user.uid, existing.uid
                    );
                    false
                }
            }
        };

        if first_ident {
            router.send_persist(self).await;
        }
    }
}

impl SessionHandle for Session {
    fn id(&self) -> u64 {
        self.id
    }

    fn uid(&self) -> Option<String> {
        self.user.read().as_ref().map(|user| user.uid.clone())
    }

    fn callsign(&self) -> Option<String> {
        self.user.read().as_ref().and_then(|user| user.callsign.clone())
    }

    fn team(&self) -> Option<Teams> {
        self.user.read().as_ref().and_then(|user| user.group)
    }

    fn is_monitor(&self) -> bool {
        self.monitor
    }

    fn send(&self, frame: Bytes) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.user.read() {
            Some(user) => write!(
                f,
                "{} ({} / {})",
                self.addr,
                user.uid,
                user.callsign.as_deref().unwrap_or("-")
            ),
            None if self.monitor => write!(f, "{} (monitor)", self.addr),
            None => write!(f, "{} (anonymous)", self.addr),
        }
    }
}
