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

use crate::server::CotServer;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    time::timeout,
};

use std::{
    io::{Read, Write},
    path::Path,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

/// The management socket filename, under the root directory.
pub const MGMT_SOCKET_NAME: &str = "taky-mgmt.sock";

/// The cap on one management request.
const MAX_REQUEST_LEN: usize = 64 * 1024;

/// How long a client gets to deliver one NUL-terminated request.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the startup liveness ping waits on an existing socket.
const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Claims the management socket path. An existing socket is pinged once: a
/// valid reply means another instance is live and startup must fail; anything
/// else means the socket is stale and is unlinked.
pub fn claim_socket(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        return Ok(());
    }

    if ping_socket(path) {
        bail!("Another instance is already live on {}", path.display());
    }
    info!("Removing stale management socket {}", path.display());
    std::fs::remove_file(path)?;
    Ok(())
}

/// Sends one `{"cmd":"ping"}` round-trip, synchronously, with a short
/// deadline. Returns `true` only on a valid JSON reply.
fn ping_socket(path: &Path) -> bool {
    let Ok(mut stream) = std::os::unix::net::UnixStream::connect(path) else {
        return false;
    };
    if stream.set_read_timeout(Some(PING_TIMEOUT)).is_err()
        || stream.set_write_timeout(Some(PING_TIMEOUT)).is_err()
        || stream.write_all(b"{\"cmd\":\"ping\"}\0").is_err()
    {
        return false;
    }

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(1) if byte[0] != 0 => {
                if response.len() >= MAX_REQUEST_LEN {
                    return false;
                }
                response.push(byte[0]);
            }
            Ok(1) => break,
            _ => return false,
        }
    }
    serde_json::from_slice::<Value>(&response).is_ok()
}

/// Serves management clients until the node shuts down.
pub async fn serve(server: Arc<CotServer>, listener: UnixListener) {
    let shutdown = server.shutdown_token();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        info!("New management client");
                        let server = server.clone();
                        tokio::spawn(async move { handle_client(server, stream).await });
                    }
                    Err(error) => info!("Dropping management client: {error}"),
                }
            }
        }
    }
}

/// Serves one management connection: NUL-framed JSON requests in, NUL-framed
/// JSON responses out, until the peer closes or stalls.
async fn handle_client(server: Arc<CotServer>, mut stream: UnixStream) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let request = match timeout(RECV_TIMEOUT, read_request(&mut stream, &mut buf)).await {
            Err(_) | Ok(None) => return,
            Ok(Some(request)) => request,
        };

        let response = dispatch(&server, &request).await;
        let mut frame = match serde_json::to_vec(&response) {
            Ok(frame) => frame,
            Err(error) => {
                warn!("Unable to encode a management response: {error}");
                return;
            }
        };
        frame.push(0);
        if stream.write_all(&frame).await.is_err() {
            return;
        }
    }
}

/// Reads up to the next NUL. Returns `None` when the peer closes or the
/// request outgrows the cap.
async fn read_request(stream: &mut UnixStream, buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    loop {
        if let Some(index) = buf.iter().position(|&byte| byte == 0) {
            let request = buf[..index].to_vec();
            buf.drain(..=index);
            return Some(request);
        }
        if buf.len() > MAX_REQUEST_LEN {
            return None;
        }

        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Routes one request to its command. Malformed requests and unknown
/// commands produce an error response; the connection stays usable.
async fn dispatch(server: &Arc<CotServer>, request: &[u8]) -> Value {
    let request: Value = match serde_json::from_slice(request) {
        Ok(request) => request,
        Err(error) => return json!({ "error": error.to_string() }),
    };

    match request.get("cmd").and_then(Value::as_str) {
        Some("ping") => json!({ "pong": "taky" }),
        Some("status") => status(server),
        Some("purge_persist") => {
            json!({ "purged": server.router().purge_persist().await })
        }
        Some("kickban") => match request.get("user").and_then(Value::as_str) {
            Some(user) => kickban(server, user),
            None => json!({ "error": "kickban requires a user" }),
        },
        Some(cmd) => json!({ "error": format!("Invalid cmd: {cmd}") }),
        None => json!({ "error": "Invalid cmd: None" }),
    }
}

/// Builds the status report: uptime plus one entry per CoT session. Monitor
/// sessions are not clients and are left out.
fn status(server: &Arc<CotServer>) -> Value {
    let uptime = (Utc::now() - server.started_at()).num_milliseconds() as f64 / 1000.0;
    let mut clients = Vec::new();

    for session in server.sessions_snapshot() {
        if session.is_monitor_session() {
            continue;
        }

        let mut entry = json!({
            "connected": unix_seconds(session.connected_at()),
            "num_rx": session.num_rx(),
            "last_rx": session.last_rx().map(unix_seconds),
            "ip": session.addr().ip().to_string(),
        });
        let meta = entry.as_object_mut().expect("entry is an object");

        match session.user() {
            Some(user) => {
                meta.insert("uid".into(), json!(user.uid));
                meta.insert("callsign".into(), json!(user.callsign));
                meta.insert("group".into(), json!(user.group.map(|team| team.name())));
                meta.insert("battery".into(), json!(user.battery));
                meta.insert("device".into(), json!(user.device.device));
                meta.insert("os".into(), json!(user.device.os));
                meta.insert("version".into(), json!(user.device.version));
                meta.insert("platform".into(), json!(user.device.platform));
            }
            None => {
                meta.insert("anonymous".into(), json!(true));
            }
        }
        clients.push(entry);
    }

    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": uptime,
        "num_clients": clients.len(),
        "clients": clients,
    })
}

/// Revokes a user's certificates and reports the serials, in decimal.
fn kickban(server: &Arc<CotServer>, user: &str) -> Value {
    match server.kickban(user) {
        Ok(revoked) => {
            let serials: Vec<Value> = revoked
                .iter()
                .filter_map(|serial| {
                    serde_json::Number::from_str(&serial.to_decimal())
                        .ok()
                        .map(Value::Number)
                })
                .collect();
            json!({ "revoked_sns": serials })
        }
        Err(error) => json!({ "error": error.to_string() }),
    }
}

fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
