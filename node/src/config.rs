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

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use std::path::{Path, PathBuf};

/// The config file searched for in the working directory.
const LOCAL_CONFIG: &str = "taky.conf";
/// The system-wide config file.
const SYSTEM_CONFIG: &str = "/etc/taky/taky.conf";

/// The CoT port when the listener is plaintext.
const DEFAULT_TCP_PORT: u16 = 8087;
/// The CoT port when the listener speaks TLS.
const DEFAULT_TLS_PORT: u16 = 8089;
/// The plaintext monitor port, available alongside a TLS listener.
const DEFAULT_MONITOR_PORT: u16 = 8087;

/// The node configuration, one section per concern.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub taky: TakySection,
    #[serde(default)]
    pub cot_server: CotServerSection,
    #[serde(default)]
    pub ssl: SslSection,
}

/// Site-wide settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TakySection {
    /// The host to bind; unset binds every interface.
    #[serde(default)]
    pub bind_ip: Option<String>,
    /// The identity advertised to clients, also the persistence namespace.
    /// Defaults to the machine hostname.
    #[serde(default)]
    pub server_address: Option<String>,
    /// Where the management socket and default paths live.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// The external persistence backend: `false` disables, `true` targets
    /// the default local instance, a string is a connect URI.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl Default for TakySection {
    fn default() -> Self {
        Self { bind_ip: None, server_address: None, root_dir: default_root_dir(), redis: None }
    }
}

/// The external persistence selector: a switch or a connect URI.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RedisConfig {
    Enabled(bool),
    Url(String),
}

/// CoT server settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CotServerSection {
    /// The CoT port; defaults to 8087 plaintext or 8089 under TLS.
    #[serde(default)]
    pub port: Option<u16>,
    /// The host to serve the plaintext monitor on; unset disables it.
    #[serde(default)]
    pub mon_ip: Option<String>,
    /// The monitor port; defaults to 8087.
    #[serde(default)]
    pub mon_port: Option<u16>,
    /// The transcript directory; unset or empty disables transcripts.
    #[serde(default)]
    pub log_cot: Option<PathBuf>,
    /// Caps how long any event stays fresh, in seconds. `-1` disables.
    #[serde(default = "default_max_persist_ttl")]
    pub max_persist_ttl: i64,
}

impl Default for CotServerSection {
    fn default() -> Self {
        Self {
            port: None,
            mon_ip: None,
            mon_port: None,
            log_cot: None,
            max_persist_ttl: default_max_persist_ttl(),
        }
    }
}

/// TLS settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SslSection {
    #[serde(default)]
    pub enabled: bool,
    /// Whether clients must present a certificate.
    #[serde(default = "default_true")]
    pub client_cert_required: bool,
    /// The CA bundle clients are verified against.
    #[serde(default = "default_ssl_path_ca")]
    pub ca: PathBuf,
    /// The server certificate chain, PEM.
    #[serde(default = "default_ssl_path_cert")]
    pub cert: PathBuf,
    /// The server private key, PEM.
    #[serde(default = "default_ssl_path_key")]
    pub key: PathBuf,
    /// Accepted for compatibility; keys must be stored decrypted.
    #[serde(default)]
    pub key_pw: Option<String>,
    /// The issued-certificate registry file.
    #[serde(default = "default_ssl_path_cert_db")]
    pub cert_db: PathBuf,
}

impl Default for SslSection {
    fn default() -> Self {
        Self {
            enabled: false,
            client_cert_required: true,
            ca: default_ssl_path_ca(),
            cert: default_ssl_path_cert(),
            key: default_ssl_path_key(),
            key_pw: None,
            cert_db: default_ssl_path_cert_db(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/var/taky")
}

fn default_max_persist_ttl() -> i64 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_ssl_path_ca() -> PathBuf {
    PathBuf::from("/etc/taky/ssl/ca.crt")
}

fn default_ssl_path_cert() -> PathBuf {
    PathBuf::from("/etc/taky/ssl/server.crt")
}

fn default_ssl_path_key() -> PathBuf {
    PathBuf::from("/etc/taky/ssl/server.key")
}

fn default_ssl_path_cert_db() -> PathBuf {
    PathBuf::from("/etc/taky/ssl/cert.db")
}

impl Config {
    /// Loads the configuration. An explicit path must exist; otherwise the
    /// working directory and the system path are tried, and built-in
    /// defaults apply when neither is present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file required, but not present: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None if Path::new(LOCAL_CONFIG).exists() => Some(PathBuf::from(LOCAL_CONFIG)),
            None if Path::new(SYSTEM_CONFIG).exists() => Some(PathBuf::from(SYSTEM_CONFIG)),
            None => None,
        };

        match path {
            Some(path) => {
                info!("Loading config file from {}", path.display());
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Unable to read {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Unable to parse {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Returns the advertised identity: the configured address or the
    /// machine hostname.
    pub fn server_address(&self) -> String {
        match &self.taky.server_address {
            Some(address) if !address.is_empty() => address.clone(),
            _ => hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string()),
        }
    }

    /// Returns the CoT port, defaulting by transport.
    pub fn cot_port(&self) -> u16 {
        self.cot_server.port.unwrap_or(match self.ssl.enabled {
            true => DEFAULT_TLS_PORT,
            false => DEFAULT_TCP_PORT,
        })
    }

    /// Returns the monitor bind address, when the monitor applies: TLS on
    /// the main listener and a monitor host configured.
    pub fn monitor_addr(&self) -> Option<(String, u16)> {
        if !self.ssl.enabled {
            return None;
        }
        let ip = self.cot_server.mon_ip.clone()?;
        Some((ip, self.cot_server.mon_port.unwrap_or(DEFAULT_MONITOR_PORT)))
    }

    /// Returns the transcript directory, if transcripts are enabled.
    pub fn transcript_dir(&self) -> Option<PathBuf> {
        self.cot_server.log_cot.clone().filter(|dir| !dir.as_os_str().is_empty())
    }

    /// Returns the management socket path.
    pub fn mgmt_socket_path(&self) -> PathBuf {
        self.taky.root_dir.join(crate::mgmt::MGMT_SOCKET_NAME)
    }

    /// Returns the external persistence URI, if the backend is selected.
    /// `None` in the pair's place means the default local instance.
    pub fn redis_url(&self) -> Option<Option<String>> {
        match &self.taky.redis {
            None | Some(RedisConfig::Enabled(false)) => None,
            Some(RedisConfig::Enabled(true)) => Some(None),
            Some(RedisConfig::Url(url)) if url.is_empty() => None,
            Some(RedisConfig::Url(url)) => Some(Some(url.clone())),
        }
    }
}
