// ABOUTME: Container operations trait for container runtimes.
// ABOUTME: List, inspect, create, start, stop, rename, and remove containers.

use super::sealed::Sealed;
use super::shared_types::{ContainerRecord, ContainerSpec, ContainerStatus};
use crate::types::{ContainerId, ContainerName};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Container lifecycle operations.
///
/// In swarm mode a "container" is a service; the semantics of each call are
/// documented on the swarm adapter.
#[async_trait]
pub trait ContainerOps: Sealed + Send + Sync {
    /// Snapshot the containers on the host as full records.
    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerRecord>, ContainerError>;

    /// The configuration a replacement for this container is created from.
    async fn inspect_spec(&self, id: &ContainerId) -> Result<ContainerSpec, ContainerError>;

    /// Current run state and health.
    async fn container_status(&self, id: &ContainerId) -> Result<ContainerStatus, ContainerError>;

    /// Create a container from the given configuration. Does not start it.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError>;

    /// Start a created container.
    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError>;

    /// Stop a running container, killing it once `timeout` elapses.
    async fn stop_container(&self, id: &ContainerId, timeout: Duration)
    -> Result<(), ContainerError>;

    /// Rename a container and return the id it is now known by.
    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &ContainerName,
    ) -> Result<ContainerId, ContainerError>;

    /// Remove a container.
    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError>;
}

/// Filters for listing containers.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilters {
    /// Filter by label (key=value).
    pub labels: HashMap<String, String>,
    /// Include stopped containers.
    pub all: bool,
}

impl ContainerFilters {
    /// Every container, running or not.
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }
}

/// Errors from container operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container already exists: {0}")]
    AlreadyExists(String),

    #[error("container not running: {0}")]
    NotRunning(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("runtime unreachable: {0}")]
    Unreachable(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
