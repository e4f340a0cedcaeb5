// ABOUTME: Identity and reachability of the engine behind a provider.
// ABOUTME: Used by `lookout check` and when a provider connects.

use super::sealed::Sealed;
use super::shared_types::RuntimeMetadata;
use crate::runtime::RuntimeMode;
use async_trait::async_trait;

#[async_trait]
pub trait RuntimeInfo: Sealed + Send + Sync {
    /// Whether records are containers or swarm services.
    fn mode(&self) -> RuntimeMode;

    /// Engine name, version and platform.
    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError>;

    /// Cheap round trip; fails when the engine cannot be reached.
    async fn ping(&self) -> Result<(), RuntimeInfoError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeInfoError {
    #[error("engine unreachable: {0}")]
    ConnectionFailed(String),

    #[error("engine error: {0}")]
    Runtime(String),
}
