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

pub mod helpers;

use takyr_node::{Config, Node};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::runtime::{self, Runtime};

use std::path::PathBuf;

/// Starts the takyr broker.
#[derive(Debug, Parser)]
#[clap(name = "takyd", version, about = "A Cursor-on-Target message broker")]
pub struct Cli {
    /// Path to the configuration file.
    #[clap(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log verbosity.
    #[clap(
        short = 'l',
        long = "log-level",
        default_value = "info",
        value_parser = ["debug", "info", "warning", "error", "critical"]
    )]
    pub log_level: String,

    /// Install the debug signal handler: SIGUSR1 toggles debug logging.
    #[clap(short = 'd', long = "debug")]
    pub debug: bool,
}

/// Runs the broker to completion.
pub fn run(cli: Cli) -> Result<()> {
    let reload_handle = helpers::initialize_logger(&cli.log_level)?;

    runtime()?.block_on(async move {
        if cli.debug {
            helpers::initialize_debug_handler(reload_handle, &cli.log_level);
        }

        let config = Config::load(cli.config.as_deref())?;
        let node = Node::new(config)?;
        node.run().await
    })
}

/// Builds the runtime for the broker.
fn runtime() -> Result<Runtime> {
    runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Unable to initialize a runtime for the broker")
}
