// ABOUTME: Connects a configured provider to its engine.
// ABOUTME: Chooses unix, plain TCP or TLS transport and the standalone or swarm adapter.

use std::sync::Arc;

use bollard::{ClientVersion, Docker};

use super::bollard::BollardRuntime;
use super::error::RuntimeError;
use super::swarm::SwarmRuntime;
use super::traits::{FullRuntime, RuntimeInfo, RuntimeInfoError};
use super::types::{Endpoint, RuntimeMode};
use crate::config::ProviderConfig;

fn parse_api_version(version: &str) -> Result<ClientVersion, RuntimeError> {
    let invalid = || RuntimeError::InvalidApiVersion {
        version: version.to_string(),
    };
    let (major, minor) = version
        .trim()
        .trim_start_matches('v')
        .split_once('.')
        .ok_or_else(invalid)?;
    Ok(ClientVersion {
        major_version: major.parse().map_err(|_| invalid())?,
        minor_version: minor.parse().map_err(|_| invalid())?,
    })
}

fn client_for(provider: &ProviderConfig) -> Result<Docker, RuntimeError> {
    let endpoint = Endpoint::parse(provider.host.as_deref()).ok_or_else(|| {
        RuntimeError::InvalidEndpoint {
            endpoint: provider.host.clone().unwrap_or_default(),
        }
    })?;
    let version = match provider.api_version.as_deref() {
        Some(v) => parse_api_version(v)?,
        None => bollard::API_DEFAULT_VERSION.clone(),
    };
    let timeout = provider.timeout.as_secs().max(1);
    let connection_failed = |e: bollard::errors::Error| {
        RuntimeError::from(RuntimeInfoError::ConnectionFailed(e.to_string()))
    };

    match (&endpoint, provider.tls.as_ref()) {
        (Endpoint::Local, None) => Docker::connect_with_local_defaults().map_err(connection_failed),
        (Endpoint::Unix(path), None) => {
            Docker::connect_with_unix(path, timeout, &version).map_err(connection_failed)
        }
        (Endpoint::Tcp(addr), None) => {
            Docker::connect_with_http(addr, timeout, &version).map_err(connection_failed)
        }
        (Endpoint::Tcp(addr), Some(tls)) => {
            if !tls.verify {
                return Err(RuntimeError::Tls {
                    reason: "connections without certificate verification are not supported"
                        .to_string(),
                });
            }
            for path in [&tls.ca, &tls.cert, &tls.key] {
                if !path.exists() {
                    return Err(RuntimeError::Tls {
                        reason: format!("{} does not exist", path.display()),
                    });
                }
            }
            Docker::connect_with_ssl(addr, &tls.key, &tls.cert, &tls.ca, timeout, &version)
                .map_err(|e| RuntimeError::Tls {
                    reason: e.to_string(),
                })
        }
        (endpoint, Some(_)) => Err(RuntimeError::Tls {
            reason: format!("TLS needs a tcp:// endpoint, got {endpoint}"),
        }),
    }
}

/// Connect to a provider and check that its engine answers.
pub async fn connect(provider: &ProviderConfig) -> Result<Arc<dyn FullRuntime>, RuntimeError> {
    let client = client_for(provider)?;
    let pull = !provider.no_pull;
    let runtime: Arc<dyn FullRuntime> = match provider.mode() {
        RuntimeMode::Standalone => Arc::new(BollardRuntime::new(client, pull)),
        RuntimeMode::Swarm => Arc::new(SwarmRuntime::new(client, pull)),
    };
    runtime.ping().await?;
    tracing::debug!(provider = %provider.id, mode = %runtime.mode(), "connected");
    Ok(runtime)
}
