// ABOUTME: Provider configuration: one engine or swarm manager to watch.
// ABOUTME: Endpoint, API version, TLS material and per-provider behaviour flags.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::{Endpoint, RuntimeMode};

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Identifier used in logs, session results and the API.
    #[serde(default)]
    pub id: String,

    /// `unix:///path`, `tcp://host:port`; unset means the local default.
    #[serde(default)]
    pub host: Option<String>,

    /// Engine API version such as `1.44`; unset negotiates the client default.
    #[serde(default)]
    pub api_version: Option<String>,

    /// Request timeout for engine calls.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default)]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub swarm: bool,

    /// Consider stopped containers too.
    #[serde(default)]
    pub watch_stopped: bool,

    /// Never pull; compare against the local image store only.
    #[serde(default)]
    pub no_pull: bool,
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    #[serde(default = "default_verify")]
    pub verify: bool,
}

fn default_verify() -> bool {
    true
}

impl ProviderConfig {
    /// The platform's default socket.
    pub fn local() -> Self {
        ProviderConfig {
            id: Self::default_id(None),
            host: None,
            api_version: None,
            timeout: default_timeout(),
            tls: None,
            swarm: false,
            watch_stopped: false,
            no_pull: false,
        }
    }

    /// Short form: a bare endpoint string.
    pub fn from_host(host: &str) -> Result<Self, String> {
        let host = host.trim();
        if host.is_empty() {
            return Err("provider host cannot be empty".to_string());
        }
        if Endpoint::parse(Some(host)).is_none() {
            return Err(format!("unsupported provider endpoint: {host}"));
        }
        Ok(ProviderConfig {
            id: Self::default_id(Some(host)),
            host: Some(host.to_string()),
            ..Self::local()
        })
    }

    /// `local` for the default socket, otherwise the host without its scheme.
    pub fn default_id(host: Option<&str>) -> String {
        match host.map(str::trim).filter(|h| !h.is_empty()) {
            None => "local".to_string(),
            Some(host) => host
                .split_once("://")
                .map(|(_, rest)| rest)
                .unwrap_or(host)
                .to_string(),
        }
    }

    pub fn mode(&self) -> RuntimeMode {
        if self.swarm {
            RuntimeMode::Swarm
        } else {
            RuntimeMode::Standalone
        }
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        Endpoint::parse(self.host.as_deref())
    }
}
