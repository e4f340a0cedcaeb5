// ABOUTME: The `api` section: HTTP trigger listener settings.

use serde::Deserialize;
use std::net::SocketAddr;

use super::EnvValue;
use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
    /// Bearer token required on every request except `/healthz`.
    pub token: Option<EnvValue>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            enabled: false,
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            token: None,
        }
    }
}

impl ApiConfig {
    pub fn resolved_token(&self) -> Result<Option<String>> {
        self.token.as_ref().map(EnvValue::resolve).transpose()
    }
}
