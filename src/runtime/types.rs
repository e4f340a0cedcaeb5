// ABOUTME: Runtime mode and engine endpoint definitions.
// ABOUTME: Parses DOCKER_HOST-style addresses into the transport to connect with.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a provider is a single engine or a swarm manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Standalone,
    Swarm,
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeMode::Standalone => write!(f, "standalone"),
            RuntimeMode::Swarm => write!(f, "swarm"),
        }
    }
}

/// Where the engine API lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Platform default socket (or `DOCKER_HOST` as bollard reads it).
    Local,
    /// Unix socket path.
    Unix(String),
    /// `tcp://`, `http://` or `https://` address.
    Tcp(String),
}

impl Endpoint {
    /// Parse a host string. `None` means the local default.
    pub fn parse(host: Option<&str>) -> Option<Self> {
        let Some(host) = host.map(str::trim).filter(|h| !h.is_empty()) else {
            return Some(Endpoint::Local);
        };
        if let Some(path) = host.strip_prefix("unix://") {
            return (!path.is_empty()).then(|| Endpoint::Unix(path.to_string()));
        }
        if ["tcp://", "http://", "https://"]
            .iter()
            .any(|scheme| host.starts_with(scheme))
        {
            return Some(Endpoint::Tcp(host.to_string()));
        }
        None
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local => write!(f, "local"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path),
            Endpoint::Tcp(addr) => write!(f, "{}", addr),
        }
    }
}
