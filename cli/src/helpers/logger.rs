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

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{
    layer::SubscriberExt,
    registry::Registry,
    reload,
    util::SubscriberInitExt,
    EnvFilter,
};

use std::io::IsTerminal;

/// The handle that swaps the log filter at runtime.
pub type ReloadHandle = reload::Handle<EnvFilter, Registry>;

/// Maps the CLI verbosity names onto filter directives.
fn directive(level: &str) -> &'static str {
    match level {
        "debug" => "debug",
        "info" => "info",
        "warning" => "warn",
        "error" => "error",
        "critical" => "error",
        _ => "info",
    }
}

/// Initializes the logger at the given verbosity, returning the reload
/// handle the debug toggle uses.
pub fn initialize_logger(level: &str) -> Result<ReloadHandle> {
    let filter = base_filter(level)?;
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::Layer::default()
                .with_ansi(std::io::stderr().is_terminal())
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("Unable to initialize the logger")?;

    Ok(handle)
}

/// Installs the SIGUSR1 handler: each signal toggles between the configured
/// verbosity and debug. Must run inside the runtime.
pub fn initialize_debug_handler(handle: ReloadHandle, level: &str) {
    let level = level.to_string();
    tokio::spawn(async move {
        let mut sigusr1 = match signal(SignalKind::user_defined1()) {
            Ok(sigusr1) => sigusr1,
            Err(error) => {
                warn!("Unable to install the SIGUSR1 handler: {error}");
                return;
            }
        };

        let mut verbose = false;
        while sigusr1.recv().await.is_some() {
            verbose = !verbose;
            let target = match verbose {
                true => "debug",
                false => directive(&level),
            };
            match base_filter(target).map(|filter| handle.reload(filter)) {
                Ok(Ok(())) => info!("Log verbosity switched to '{target}'"),
                Ok(Err(error)) => warn!("Unable to switch log verbosity: {error}"),
                Err(error) => warn!("Unable to build the '{target}' filter: {error}"),
            }
        }
    });
}

/// Builds the filter for a verbosity name, quieting the noisy dependencies.
fn base_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(format!("{},mio=off,hyper=off", directive(level)))
        .context("Unable to build the log filter")
}
