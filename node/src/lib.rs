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

pub mod config;
pub use config::Config;

mod disconnect;
pub use disconnect::*;

pub mod mgmt;

mod server;
pub use server::*;

mod session;
pub use session::*;

mod tls;
pub use tls::*;

mod transcript;
pub use transcript::*;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use std::sync::Arc;

/// The takyr node: the broker plus process-level signal handling.
pub struct Node {
    server: Arc<CotServer>,
}

impl Node {
    /// Initializes a node from its configuration.
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self { server: Arc::new(CotServer::new(config)?) })
    }

    /// Returns the token that shuts the node down when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.server.shutdown_token()
    }

    /// Returns a reference to the broker.
    pub fn server(&self) -> &Arc<CotServer> {
        &self.server
    }

    /// Serves until SIGINT or SIGTERM, then shuts down gracefully.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.server.shutdown_token();
        tokio::spawn(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(error) => {
                    error!("Unable to install the SIGTERM handler: {error}");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
            shutdown.cancel();
        });

        self.server.run().await
    }
}
