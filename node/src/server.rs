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

use crate::{
    config::Config,
    disconnect::DisconnectReason,
    mgmt,
    session::Session,
    tls::{self, PeerIdentity},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use takyr_certdb::{CertDb, SerialNumber};
use takyr_node_router::{PersistStore, Router, SessionHandle};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream, UnixListener},
    task::JoinHandle,
    time::timeout,
};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use std::{
    net::SocketAddr,
    os::unix::fs::PermissionsExt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// How long an accepted socket gets to finish its TLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the housekeeping task wakes.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// The broker: every listener, every session, the router, and the
/// certificate registry.
pub struct CotServer {
    config: Config,
    router: Arc<Router>,
    /// Present when the listener does TLS.
    certdb: Option<Arc<CertDb>>,
    /// Every live session, CoT and monitor alike, by session id.
    sessions: RwLock<IndexMap<u64, Arc<Session>>>,
    next_session_id: AtomicU64,
    started_at: DateTime<Utc>,
    /// Cancelling this token shuts the whole node down.
    shutdown: CancellationToken,
}

impl CotServer {
    /// Initializes the broker from its configuration. Fails on unreadable
    /// certificate material or an unreachable persistence configuration.
    pub fn new(config: Config) -> Result<Self> {
        let persist = match config.redis_url() {
            Some(url) => PersistStore::redis(url.as_deref(), &config.server_address())
                .context("Unable to configure the persistence store")?,
            None => PersistStore::memory(),
        };
        let router = Arc::new(Router::new(persist, config.cot_server.max_persist_ttl));

        let certdb = match config.ssl.enabled {
            true => Some(Arc::new(
                CertDb::load(&config.ssl.cert_db)
                    .context("Unable to load the certificate database")?,
            )),
            false => None,
        };

        Ok(Self {
            config,
            router,
            certdb,
            sessions: Default::default(),
            next_session_id: AtomicU64::new(1),
            started_at: Utc::now(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Returns the token that shuts the node down when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns a reference to the router.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Returns when the broker started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns a snapshot of the live sessions.
    pub fn sessions_snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Binds every listener and serves until the shutdown token fires.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        // The management socket comes up first: it doubles as the
        // single-instance lock.
        let mgmt_path = self.config.mgmt_socket_path();
        mgmt::claim_socket(&mgmt_path)?;
        let mgmt_listener = UnixListener::bind(&mgmt_path)
            .with_context(|| format!("Unable to bind {}", mgmt_path.display()))?;
        std::fs::set_permissions(&mgmt_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Unable to restrict {}", mgmt_path.display()))?;

        let acceptor = match self.config.ssl.enabled {
            true => Some(tls::build_acceptor(&self.config.ssl)?),
            false => None,
        };

        let bind_ip = self.config.taky.bind_ip.clone().unwrap_or_else(|| "0.0.0.0".to_string());
        let cot_port = self.config.cot_port();
        let mode = match acceptor.is_some() {
            true => "ssl",
            false => "tcp",
        };
        info!("Listening for {mode} on {bind_ip}:{cot_port}");
        let cot_listener = TcpListener::bind((bind_ip.as_str(), cot_port))
            .await
            .with_context(|| format!("Unable to bind {bind_ip}:{cot_port}"))?;

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(tokio::spawn(self.clone().accept_loop(cot_listener, acceptor, false)));

        if let Some((mon_ip, mon_port)) = self.config.monitor_addr() {
            info!("Monitor listening for tcp on {mon_ip}:{mon_port}");
            let mon_listener = TcpListener::bind((mon_ip.as_str(), mon_port))
                .await
                .with_context(|| format!("Unable to bind {mon_ip}:{mon_port}"))?;
            tasks.push(tokio::spawn(self.clone().accept_loop(mon_listener, None, true)));
        }

        tasks.push(tokio::spawn(mgmt::serve(self.clone(), mgmt_listener)));
        tasks.push(tokio::spawn(self.clone().heartbeat()));

        // Serve until told otherwise.
        self.shutdown.cancelled().await;

        info!("Sending disconnect to clients");
        for session in self.sessions_snapshot() {
            session.disconnect(DisconnectReason::ServerShutdown);
        }
        for task in tasks {
            task.abort();
        }
        let _ = std::fs::remove_file(&mgmt_path);
        info!("Stopped");
        Ok(())
    }

    /// Accepts connections until shutdown. `monitor` marks the plaintext
    /// monitor listener.
    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        acceptor: Option<TlsAcceptor>,
        monitor: bool,
    ) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let server = self.clone();
                            let acceptor = acceptor.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream, addr, acceptor, monitor).await;
                            });
                        }
                        Err(error) => info!("Client connect failed: {error}"),
                    }
                }
            }
        }
    }

    /// Runs one connection from accept to teardown.
    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
        acceptor: Option<TlsAcceptor>,
        monitor: bool,
    ) {
        let mode = match acceptor.is_some() {
            true => "ssl",
            false => "tcp",
        };
        info!("New {mode} client from {addr}");

        let (reader, writer, peer) = match self.establish(stream, addr, acceptor).await {
            Some(parts) => parts,
            None => return,
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (session, outbox) = Session::new(
            session_id,
            addr,
            monitor,
            peer,
            self.config.transcript_dir(),
            self.shutdown.child_token(),
        );

        self.sessions.write().insert(session_id, session.clone());
        self.router.register(session.clone() as Arc<dyn SessionHandle>);

        // Monitors never identify, so they get the world view up front.
        if monitor {
            self.router.send_persist(session.as_ref()).await;
        }

        let writer_task = tokio::spawn(session.clone().send_loop(writer, outbox));
        let reason = session.clone().recv_loop(reader, self.router.clone()).await;
        let reason = session.disconnect_reason().unwrap_or(reason);

        info!("Disconnecting {session}: {reason}");
        session.disconnect(reason);
        self.router.deregister(session_id);
        self.sessions.write().shift_remove(&session_id);
        session.close_transcript();
        let _ = writer_task.await;
    }

    /// Finishes transport establishment: for TLS, the handshake must land
    /// within `HANDSHAKE_TIMEOUT` and yields the peer identity.
    async fn establish(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        acceptor: Option<TlsAcceptor>,
    ) -> Option<(
        Box<dyn AsyncRead + Send + Unpin>,
        Box<dyn AsyncWrite + Send + Unpin>,
        Option<PeerIdentity>,
    )> {
        match acceptor {
            None => {
                let (reader, writer) = stream.into_split();
                Some((Box::new(reader), Box::new(writer), None))
            }
            Some(acceptor) => match timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Err(_) => {
                    info!("Disconnecting {addr}: {}", DisconnectReason::HandshakeTimeout);
                    None
                }
                Ok(Err(error)) => {
                    info!("Rejecting client {addr} ({error})");
                    None
                }
                Ok(Ok(tls_stream)) => {
                    let peer = tls::peer_identity(tls_stream.get_ref().1.peer_certificates());
                    if let Some(peer) = &peer {
                        debug!(
                            "Client {addr} presented certificate {} (serial {})",
                            peer.common_name.as_deref().unwrap_or("-"),
                            peer.serial
                        );
                    }
                    let (reader, writer) = tokio::io::split(tls_stream);
                    Some((Box::new(reader), Box::new(writer), peer))
                }
            },
        }
    }

    /// Periodic housekeeping: sweeps the persistence store on the router's
    /// own rate limit.
    async fn heartbeat(self: Arc<Self>) {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => self.router.prune().await,
            }
        }
    }

    /// Revokes every valid certificate for the CommonName and tears down any
    /// live session holding one of them. Returns the serials revoked.
    pub fn kickban(&self, name: &str) -> Result<Vec<SerialNumber>> {
        let Some(certdb) = &self.certdb else {
            return Ok(Vec::new());
        };
        let revoked = certdb.revoke_by_name(name)?;
        if revoked.is_empty() {
            return Ok(revoked);
        }

        for session in self.sessions_snapshot() {
            if let Some(peer) = session.peer() {
                if revoked.contains(&peer.serial) {
                    info!("Disconnecting {session}: {}", DisconnectReason::Banned);
                    session.disconnect(DisconnectReason::Banned);
                }
            }
        }
        Ok(revoked)
    }
}
