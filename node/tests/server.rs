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

use bytes::BytesMut;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use serde_json::Value;
use takyr_node::{CotServer, Config};
use takyr_node_cot::{CotDecoder, Event};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UnixStream},
    time::{sleep, timeout},
};
use tokio_util::codec::Decoder;

use std::{path::PathBuf, sync::Arc, time::Duration};

const SETTLE: Duration = Duration::from_millis(150);
const DEADLINE: Duration = Duration::from_secs(2);

/// Boots a plaintext broker on an ephemeral port rooted in a temp dir.
async fn start_node(root: &tempfile::TempDir) -> (Arc<CotServer>, u16, PathBuf) {
    // Grab a free port, then hand it to the broker.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let raw = format!(
        r#"
        [taky]
        bind_ip = "127.0.0.1"
        server_address = "test.local"
        root_dir = "{root}"

        [cot_server]
        port = {port}
        "#,
        root = root.path().display(),
    );
    let config: Config = toml::from_str(&raw).unwrap();
    let mgmt_path = config.mgmt_socket_path();

    let server = Arc::new(CotServer::new(config).unwrap());
    tokio::spawn(server.clone().run());

    // Wait for the listener to come up.
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "broker did not come up");
        sleep(Duration::from_millis(20)).await;
    }

    (server, port, mgmt_path)
}

/// A raw CoT client over TCP with its own stream decoder.
struct TestClient {
    stream: TcpStream,
    decoder: CotDecoder,
    buf: BytesMut,
}

impl TestClient {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        Self { stream, decoder: CotDecoder::new(), buf: BytesMut::new() }
    }

    async fn send(&mut self, document: &str) {
        self.stream.write_all(document.as_bytes()).await.unwrap();
    }

    /// Receives the next event, waiting up to `DEADLINE`.
    async fn recv(&mut self) -> Event {
        self.try_recv().await.expect("expected an event before the deadline")
    }

    async fn try_recv(&mut self) -> Option<Event> {
        let deadline = tokio::time::Instant::now() + DEADLINE;
        loop {
            if let Some(element) = self.decoder.decode(&mut self.buf).unwrap() {
                return Some(Event::from_element(&element).unwrap());
            }

            let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
            let mut chunk = [0u8; 4096];
            match timeout(remaining, self.stream.read(&mut chunk)).await {
                Err(_) => return None,
                Ok(Ok(0)) | Ok(Err(_)) => return None,
                Ok(Ok(n)) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Reads until the stream has been quiet for a settle interval.
    async fn drain(&mut self) {
        loop {
            while self.decoder.decode(&mut self.buf).unwrap().is_some() {}
            let mut chunk = [0u8; 4096];
            match timeout(SETTLE, self.stream.read(&mut chunk)).await {
                Err(_) => return,
                Ok(Ok(0)) | Ok(Err(_)) => return,
                Ok(Ok(n)) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Asserts that nothing arrives for a settle interval.
    async fn assert_silent(&mut self) {
        if let Some(element) = self.decoder.decode(&mut self.buf).unwrap() {
            panic!("unexpected event: {element}");
        }
        let mut chunk = [0u8; 4096];
        match timeout(SETTLE, self.stream.read(&mut chunk)).await {
            Err(_) => (),
            Ok(Ok(0)) => (),
            Ok(Ok(n)) => panic!("unexpected bytes: {:?}", &chunk[..n]),
            Ok(Err(_)) => (),
        }
    }
}

fn timestamps(stale_secs: i64) -> (String, String) {
    let now = Utc::now();
    (
        now.to_rfc3339_opts(SecondsFormat::Millis, true),
        (now + ChronoDuration::seconds(stale_secs)).to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

fn atom_event(uid: &str) -> String {
    let (now, stale) = timestamps(600);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><event version="2.0" uid="{uid}" type="a-u-G" how="h-g-i-g-o" time="{now}" start="{now}" stale="{stale}"><point lat="54.338986" lon="9.755263" hae="0.0" ce="9999999.0" le="9999999.0"/><detail><contact callsign="poop"/></detail></event>"#
    )
}

fn identity_event(uid: &str, callsign: &str, team: &str) -> String {
    let (now, stale) = timestamps(600);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><event version="2.0" uid="{uid}" type="a-f-G-U-C" how="m-g" time="{now}" start="{now}" stale="{stale}"><point lat="1.234567" lon="-3.141592" hae="-25.7" ce="9.9" le="9999999.0"/><detail><takv os="29" version="4.0" device="Test Device" platform="ATAK-CIV"/><contact endpoint="*:-1:stcp" callsign="{callsign}"/><uid Droid="{callsign}"/><__group role="Team Member" name="{team}"/><status battery="78"/></detail></event>"#
    )
}

fn ping_event(uid: &str) -> String {
    let (now, stale) = timestamps(20);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><event version="2.0" uid="{uid}" type="t-x-c-t" how="h-g-i-g-o" time="{now}" start="{now}" stale="{stale}"><point lat="0.000000" lon="0.000000" hae="0.0" ce="9999999.0" le="9999999.0"/></event>"#
    )
}

fn direct_chat_event(src_uid: &str, src_cs: &str, dst_uid: &str, dst_cs: &str) -> String {
    let (now, stale) = timestamps(86_400);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><event version="2.0" uid="GeoChat.{src_uid}.{dst_cs}" type="b-t-f" how="h-g-i-g-o" time="{now}" start="{now}" stale="{stale}"><point lat="0.000000" lon="0.000000" hae="0.0" ce="9999999.0" le="9999999.0"/><detail><__chat parent="RootContactGroup" groupOwner="false" chatroom="{dst_cs}" id="{dst_uid}" senderCallsign="{src_cs}"><chatgrp uid0="{src_uid}" uid1="{dst_uid}" id="{dst_uid}"/></__chat><link uid="{src_uid}" type="a-f-G-U-C" relation="p-p"/><remarks source="BAO.F.ATAK.{src_uid}" to="{dst_uid}">hello</remarks></detail></event>"#
    )
}

async fn mgmt_request(path: &PathBuf, request: &str) -> Value {
    let mut stream = UnixStream::connect(path).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_all(&[0]).await.unwrap();

    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = timeout(DEADLINE, stream.read(&mut chunk)).await.unwrap().unwrap();
        assert!(n > 0, "management socket closed early");
        response.extend_from_slice(&chunk[..n]);
        if response.contains(&0) {
            break;
        }
    }
    response.pop();
    serde_json::from_slice(&response).unwrap()
}

#[tokio::test]
async fn anonymous_events_broadcast_and_stick() {
    let root = tempfile::TempDir::new().unwrap();
    let (server, port, _) = start_node(&root).await;

    let mut x = TestClient::connect(port).await;
    let mut y = TestClient::connect(port).await;
    let mut z = TestClient::connect(port).await;
    sleep(SETTLE).await;

    x.send(&atom_event("anon-1")).await;

    for peer in [&mut y, &mut z] {
        let event = peer.recv().await;
        assert_eq!(event.uid, "anon-1");
        assert_eq!(event.etype, "a-u-G");
    }
    x.assert_silent().await;
    assert!(server.router().persist().exists("anon-1").await);
}

#[tokio::test]
async fn identification_rebroadcasts_and_snapshots_late_joiners() {
    let root = tempfile::TempDir::new().unwrap();
    let (_server, port, _) = start_node(&root).await;

    let mut x = TestClient::connect(port).await;
    let mut y = TestClient::connect(port).await;
    sleep(SETTLE).await;

    x.send(&identity_event("uid-x", "JENNY", "Cyan")).await;
    assert_eq!(y.recv().await.uid, "uid-x");

    // W joins late and identifies; the snapshot replays X's announcement
    // exactly once.
    let mut w = TestClient::connect(port).await;
    sleep(SETTLE).await;
    w.send(&identity_event("uid-w", "WHISKEY", "Red")).await;

    let replay = w.recv().await;
    assert_eq!(replay.uid, "uid-x");
    assert_eq!(replay.etype, "a-f-G-U-C");

    // X receives W's announcement but never its own back.
    let from_w = x.recv().await;
    assert_eq!(from_w.uid, "uid-w");
    x.assert_silent().await;
}

#[tokio::test]
async fn pings_are_answered_once_and_not_routed() {
    let root = tempfile::TempDir::new().unwrap();
    let (_server, port, _) = start_node(&root).await;

    let mut x = TestClient::connect(port).await;
    let mut y = TestClient::connect(port).await;
    sleep(SETTLE).await;

    x.send(&ping_event("x-ping")).await;

    let pong = x.recv().await;
    assert_eq!(pong.etype, "t-x-c-t-r");
    assert_eq!(pong.uid, "takPong");
    assert_eq!(pong.stale - pong.time, ChronoDuration::seconds(20));

    x.assert_silent().await;
    y.assert_silent().await;
}

#[tokio::test]
async fn direct_chat_reaches_only_the_addressee() {
    let root = tempfile::TempDir::new().unwrap();
    let (_server, port, _) = start_node(&root).await;

    let mut x = TestClient::connect(port).await;
    let mut y = TestClient::connect(port).await;
    let mut z = TestClient::connect(port).await;
    sleep(SETTLE).await;

    x.send(&identity_event("uid-x", "XRAY", "Cyan")).await;
    y.send(&identity_event("uid-y", "JENNY", "Cyan")).await;
    z.send(&identity_event("uid-z", "ZULU", "Cyan")).await;

    // Drain the identification chatter.
    for client in [&mut x, &mut y, &mut z] {
        client.drain().await;
    }

    x.send(&direct_chat_event("uid-x", "XRAY", "uid-y", "JENNY")).await;

    let chat = y.recv().await;
    assert_eq!(chat.etype, "b-t-f");
    z.assert_silent().await;
    x.assert_silent().await;
}

#[tokio::test]
async fn marti_destinations_are_unicast() {
    let root = tempfile::TempDir::new().unwrap();
    let (_server, port, _) = start_node(&root).await;

    let mut x = TestClient::connect(port).await;
    let mut y = TestClient::connect(port).await;
    let mut z = TestClient::connect(port).await;
    sleep(SETTLE).await;

    y.send(&identity_event("uid-y", "JENNY", "Cyan")).await;
    for client in [&mut x, &mut z] {
        client.drain().await;
    }

    let (now, stale) = timestamps(600);
    x.send(&format!(
        r#"<event version="2.0" uid="m-1" type="a-u-G" how="h-g-i-g-o" time="{now}" start="{now}" stale="{stale}"><point lat="0.000000" lon="0.000000" hae="0.0" ce="9999999.0" le="9999999.0"/><detail><marti><dest uid="uid-y"/></marti></detail></event>"#
    ))
    .await;

    assert_eq!(y.recv().await.uid, "m-1");
    z.assert_silent().await;
}

#[tokio::test]
async fn the_management_plane_answers_over_the_unix_socket() {
    let root = tempfile::TempDir::new().unwrap();
    let (_server, port, mgmt_path) = start_node(&root).await;

    assert_eq!(
        mgmt_request(&mgmt_path, r#"{"cmd":"ping"}"#).await,
        serde_json::json!({ "pong": "taky" })
    );

    let mut x = TestClient::connect(port).await;
    let mut monitor_free = TestClient::connect(port).await;
    sleep(SETTLE).await;
    x.send(&identity_event("uid-x", "JENNY", "Cyan")).await;
    assert_eq!(monitor_free.recv().await.uid, "uid-x");

    let status = mgmt_request(&mgmt_path, r#"{"cmd":"status"}"#).await;
    assert_eq!(status["num_clients"], 2);
    let clients = status["clients"].as_array().unwrap();
    let jenny = clients
        .iter()
        .find(|client| client["uid"] == "uid-x")
        .expect("identified client listed");
    assert_eq!(jenny["callsign"], "JENNY");
    assert_eq!(jenny["group"], "Cyan");
    assert_eq!(jenny["battery"], "78");
    assert!(clients.iter().any(|client| client["anonymous"] == true));

    let purged = mgmt_request(&mgmt_path, r#"{"cmd":"purge_persist"}"#).await;
    assert_eq!(purged["purged"], 1);

    let error = mgmt_request(&mgmt_path, r#"{"cmd":"frobnicate"}"#).await;
    assert!(error["error"].as_str().unwrap().contains("frobnicate"));

    let malformed = mgmt_request(&mgmt_path, r#"{"cmd": nope"#).await;
    assert!(malformed.get("error").is_some());
}

#[tokio::test]
async fn a_live_management_socket_blocks_a_second_instance() {
    let root = tempfile::TempDir::new().unwrap();
    let (_server, _port, mgmt_path) = start_node(&root).await;

    assert!(takyr_node::mgmt::claim_socket(&mgmt_path).is_err());
}

#[tokio::test]
async fn a_stale_management_socket_is_reclaimed() {
    let root = tempfile::TempDir::new().unwrap();
    let path = root.path().join("taky-mgmt.sock");
    // A socket nobody is listening on.
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());

    assert!(takyr_node::mgmt::claim_socket(&path).is_ok());
    assert!(!path.exists());
}

#[tokio::test]
async fn garbage_bytes_tear_the_session_down() {
    let root = tempfile::TempDir::new().unwrap();
    let (_server, port, _) = start_node(&root).await;

    let mut x = TestClient::connect(port).await;
    sleep(SETTLE).await;
    x.send("</event>").await;

    // The server closes the socket on the syntax error.
    let deadline = tokio::time::Instant::now() + DEADLINE;
    let mut chunk = [0u8; 64];
    loop {
        match timeout(Duration::from_millis(100), x.stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) => break,
            _ => assert!(tokio::time::Instant::now() < deadline, "session not closed"),
        }
    }

    // A malformed single event does not: the stream stays usable.
    let mut y = TestClient::connect(port).await;
    let mut z = TestClient::connect(port).await;
    sleep(SETTLE).await;
    let (now, stale) = timestamps(600);
    y.send(&format!(
        r#"<event version="2.0" type="a-u-G" how="x" time="{now}" start="{now}" stale="{stale}"><point lat="0.000000" lon="0.000000" hae="0.0" ce="9999999.0" le="9999999.0"/></event>"#
    ))
    .await;
    y.send(&atom_event("still-alive")).await;
    assert_eq!(z.recv().await.uid, "still-alive");
}
