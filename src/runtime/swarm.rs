// ABOUTME: Bollard-based runtime for swarm services.
// ABOUTME: Maps services onto the container surface: stop scales to zero, rename re-creates.

use crate::runtime::bollard::{engine_metadata, pull};
use crate::runtime::traits::sealed::Sealed;
use crate::runtime::traits::{
    ContainerError, ContainerFilters, ContainerOps, ContainerRecord, ContainerSpec,
    ContainerState, ContainerStatus, ImageError, ImageOps, RuntimeInfo, RuntimeInfoError,
    RuntimeMetadata,
};
use crate::runtime::RuntimeMode;
use crate::types::{ContainerId, ContainerName, Digest, ImageId, ImageRef};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    Service, ServiceSpec, ServiceSpecMode, ServiceSpecModeReplicated, TaskSpec,
    TaskSpecContainerSpec, TaskState,
};
use bollard::query_parameters::{
    InspectServiceOptions, ListServicesOptions, ListTasksOptions, UpdateServiceOptions,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Label recording how many replicas a service had before it was scaled to zero.
pub const REPLICAS_LABEL: &str = "lookout.replicas";

const TASK_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn map_service_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::NotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 409 => ContainerError::AlreadyExists(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 400 => ContainerError::InvalidConfig(message.clone()),
        bollard::errors::Error::DockerResponseServerError { message, .. } => {
            ContainerError::Runtime(message.clone())
        }
        _ => ContainerError::Unreachable(e.to_string()),
    }
}

fn container_spec_of(spec: &ServiceSpec) -> Option<&TaskSpecContainerSpec> {
    spec.task_template.as_ref()?.container_spec.as_ref()
}

fn container_spec_mut(spec: &mut ServiceSpec) -> &mut TaskSpecContainerSpec {
    spec.task_template
        .get_or_insert_with(TaskSpec::default)
        .container_spec
        .get_or_insert_with(TaskSpecContainerSpec::default)
}

/// `None` for global services.
fn replicas_of(spec: &ServiceSpec) -> Option<u64> {
    match spec.mode.as_ref() {
        Some(mode) => mode
            .replicated
            .as_ref()
            .map(|r| r.replicas.unwrap_or(1).max(0) as u64),
        None => Some(1),
    }
}

fn set_replicas(spec: &mut ServiceSpec, replicas: u64) {
    spec.mode = Some(ServiceSpecMode {
        replicated: Some(ServiceSpecModeReplicated {
            replicas: Some(replicas as i64),
        }),
        ..Default::default()
    });
}

fn version_of(service: &Service) -> i32 {
    service
        .version
        .as_ref()
        .and_then(|v| v.index)
        .unwrap_or(0) as i32
}

fn record_from_service(service: &Service) -> Result<ContainerRecord, ContainerError> {
    let spec = service
        .spec
        .as_ref()
        .ok_or_else(|| ContainerError::InvalidConfig("service without spec".into()))?;
    let raw_name = spec.name.as_deref().unwrap_or_default();
    let name = ContainerName::new(raw_name)
        .map_err(|e| ContainerError::InvalidConfig(format!("{raw_name}: {e}")))?;
    let raw_image = container_spec_of(spec)
        .and_then(|c| c.image.as_deref())
        .unwrap_or_default();
    let pinned = ImageRef::parse(raw_image)
        .map_err(|e| ContainerError::InvalidConfig(format!("{raw_image}: {e}")))?;
    let digest = pinned.digest().and_then(|d| Digest::parse(d).ok());

    let running = replicas_of(spec).is_none_or(|n| n > 0);
    Ok(ContainerRecord {
        id: ContainerId::new(service.id.clone().unwrap_or_default()),
        name,
        image: pinned.without_digest(),
        image_id: ImageId::new(digest.as_ref().map(Digest::to_string).unwrap_or_default()),
        digest,
        links: BTreeSet::new(),
        labels: spec.labels.clone().unwrap_or_default(),
        state: if running {
            ContainerState::Running
        } else {
            ContainerState::Exited
        },
    })
}

fn domain_spec(spec: &ServiceSpec) -> Result<ContainerSpec, ContainerError> {
    let record = record_from_service(&Service {
        spec: Some(spec.clone()),
        ..Default::default()
    })?;

    let mut domain = ContainerSpec::new(record.name, record.image);
    domain.labels = record.labels;
    domain.replicas = replicas_of(spec);
    if let Some(container) = container_spec_of(spec) {
        domain.env = container.env.clone().unwrap_or_default();
        domain.command = container.command.clone();
        domain.working_dir = container.dir.clone();
        domain.user = container.user.clone();
        domain.hostname = container.hostname.clone();
        domain.stop_signal = container.stop_signal.clone();
    }
    Ok(domain)
}

/// Runtime that treats each swarm service as one container.
///
/// Service specs seen by `inspect_spec` are cached by name so that a
/// replacement, or a rollback to the original name, keeps everything the
/// domain spec does not model (networks, published ports, placement).
pub struct SwarmRuntime {
    client: Docker,
    pull: bool,
    templates: Mutex<HashMap<String, ServiceSpec>>,
}

impl SwarmRuntime {
    pub fn new(client: Docker, pull: bool) -> Self {
        Self {
            client,
            pull,
            templates: Mutex::new(HashMap::new()),
        }
    }

    /// Pin an unpinned reference to the repo digest of the local image, so
    /// every node runs the same content.
    async fn pinned(&self, image: &ImageRef) -> ImageRef {
        if image.is_pinned() {
            return image.clone();
        }
        let Ok(details) = self
            .client
            .inspect_image(&image.to_string())
            .await
        else {
            return image.clone();
        };
        let repo_digests = details.repo_digests.unwrap_or_default();
        match image.match_repo_digest(repo_digests.iter().map(String::as_str)) {
            Some(digest) => image.with_digest(&digest),
            None => image.clone(),
        }
    }

    async fn inspect_service(&self, id: &ContainerId) -> Result<Service, ContainerError> {
        self.client
            .inspect_service(id.as_str(), None::<InspectServiceOptions>)
            .await
            .map_err(map_service_error)
    }

    async fn update(&self, service: &Service, spec: ServiceSpec) -> Result<(), ContainerError> {
        let id = service.id.clone().unwrap_or_default();
        let opts = UpdateServiceOptions {
            version: version_of(service),
            ..Default::default()
        };
        self.client
            .update_service(&id, spec, opts, None)
            .await
            .map_err(map_service_error)?;
        Ok(())
    }

    async fn create(&self, spec: ServiceSpec) -> Result<ContainerId, ContainerError> {
        let response = self
            .client
            .create_service(spec, None)
            .await
            .map_err(map_service_error)?;
        let id = response
            .id
            .ok_or_else(|| ContainerError::Runtime("service create returned no id".into()))?;
        Ok(ContainerId::new(id))
    }

    async fn running_tasks(&self, id: &ContainerId) -> Result<usize, ContainerError> {
        let filters = HashMap::from([
            ("service".to_string(), vec![id.to_string()]),
            ("desired-state".to_string(), vec!["running".to_string()]),
        ]);
        let tasks = self
            .client
            .list_tasks(Some(ListTasksOptions {
                filters: Some(filters),
                ..Default::default()
            }))
            .await
            .map_err(map_service_error)?;
        Ok(tasks
            .iter()
            .filter(|t| {
                t.status.as_ref().and_then(|s| s.state) == Some(TaskState::RUNNING)
            })
            .count())
    }
}

impl Sealed for SwarmRuntime {}

#[async_trait]
impl RuntimeInfo for SwarmRuntime {
    fn mode(&self) -> RuntimeMode {
        RuntimeMode::Swarm
    }

    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError> {
        engine_metadata(&self.client, "docker swarm").await
    }

    async fn ping(&self) -> Result<(), RuntimeInfoError> {
        self.client
            .ping()
            .await
            .map_err(|e| RuntimeInfoError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ImageOps for SwarmRuntime {
    async fn resolve_latest_digest(&self, reference: &ImageRef) -> Result<Digest, ImageError> {
        if self.pull {
            pull(&self.client, reference).await?;
        }
        let image_name = reference.to_string();
        let details = self.client.inspect_image(&image_name).await.map_err(|e| match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => ImageError::NotFound(image_name.clone()),
            other => ImageError::Runtime(format!("failed to inspect {}: {}", image_name, other)),
        })?;
        let repo_digests = details.repo_digests.unwrap_or_default();
        reference
            .match_repo_digest(repo_digests.iter().map(String::as_str))
            .ok_or(ImageError::NoDigest(image_name))
    }

    async fn remove_image(&self, _id: &ImageId, _force: bool) -> Result<(), ImageError> {
        // Nodes garbage-collect service images themselves.
        Ok(())
    }
}

#[async_trait]
impl ContainerOps for SwarmRuntime {
    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerRecord>, ContainerError> {
        let services = self
            .client
            .list_services(None::<ListServicesOptions>)
            .await
            .map_err(map_service_error)?;

        let mut records = Vec::with_capacity(services.len());
        for service in &services {
            match record_from_service(service) {
                Ok(record) => {
                    let wanted = filters
                        .labels
                        .iter()
                        .all(|(k, v)| record.labels.get(k) == Some(v));
                    if wanted && (filters.all || record.is_running()) {
                        records.push(record);
                    }
                }
                Err(e) => tracing::debug!(error = %e, "not tracking service"),
            }
        }
        Ok(records)
    }

    async fn inspect_spec(&self, id: &ContainerId) -> Result<ContainerSpec, ContainerError> {
        let service = self.inspect_service(id).await?;
        let spec = service
            .spec
            .ok_or_else(|| ContainerError::InvalidConfig(format!("service {id} has no spec")))?;
        let mut domain = domain_spec(&spec)?;
        // Replicas of a stopped service live in the label until start.
        if let Some(saved) = domain
            .labels
            .remove(REPLICAS_LABEL)
            .and_then(|v| v.parse().ok())
        {
            domain.replicas = Some(saved);
        }
        self.templates.lock().insert(domain.name.to_string(), spec);
        Ok(domain)
    }

    async fn container_status(&self, id: &ContainerId) -> Result<ContainerStatus, ContainerError> {
        let running = self.running_tasks(id).await?;
        Ok(ContainerStatus {
            state: if running > 0 {
                ContainerState::Running
            } else {
                ContainerState::Exited
            },
            health: None,
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError> {
        let mut service = self
            .templates
            .lock()
            .get(spec.name.as_str())
            .cloned()
            .unwrap_or_default();
        service.name = Some(spec.name.to_string());
        let mut labels = spec.labels.clone();
        labels.insert(
            REPLICAS_LABEL.to_string(),
            spec.replicas.unwrap_or(1).to_string(),
        );
        service.labels = Some(labels);
        set_replicas(&mut service, 0);

        let image = self.pinned(&spec.image).await;
        let container = container_spec_mut(&mut service);
        container.image = Some(image.to_string());
        container.env = Some(spec.env.clone()).filter(|e| !e.is_empty());
        container.command = spec.command.clone();
        container.dir = spec.working_dir.clone();
        container.user = spec.user.clone();
        container.hostname = spec.hostname.clone();

        self.create(service).await
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        let service = self.inspect_service(id).await?;
        let mut spec = service.spec.clone().unwrap_or_default();
        let mut labels = spec.labels.take().unwrap_or_default();
        let replicas = labels
            .remove(REPLICAS_LABEL)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        spec.labels = Some(labels);
        set_replicas(&mut spec, replicas);
        self.update(&service, spec).await
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let service = self.inspect_service(id).await?;
        let mut spec = service.spec.clone().unwrap_or_default();
        let Some(replicas) = replicas_of(&spec) else {
            return Err(ContainerError::InvalidConfig(format!(
                "global service {id} cannot be scaled down"
            )));
        };
        if replicas > 0 {
            spec.labels
                .get_or_insert_with(HashMap::new)
                .insert(REPLICAS_LABEL.to_string(), replicas.to_string());
        }
        set_replicas(&mut spec, 0);
        self.update(&service, spec).await?;

        let deadline = Instant::now() + timeout;
        while self.running_tasks(id).await? > 0 {
            if Instant::now() >= deadline {
                tracing::warn!(service = %id, "tasks still running after stop grace period");
                break;
            }
            tokio::time::sleep(TASK_POLL_INTERVAL).await;
        }
        Ok(())
    }

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &ContainerName,
    ) -> Result<ContainerId, ContainerError> {
        let service = self.inspect_service(id).await?;
        let current = service.spec.clone().unwrap_or_default();

        // Renaming back to a name whose spec was cached restores the original.
        let cached = self.templates.lock().get(new_name.as_str()).cloned();
        let mut renamed = match cached {
            Some(mut original) => {
                original.labels = current.labels.clone();
                original.mode = current.mode.clone();
                original
            }
            None => {
                let mut parked = current.clone();
                // Published ports stay with the service that will own the name.
                parked.endpoint_spec = None;
                parked
            }
        };
        renamed.name = Some(new_name.to_string());

        // Swarm names are unique, so the original has to go before a restore.
        self.client
            .delete_service(id.as_str())
            .await
            .map_err(map_service_error)?;
        match self.create(renamed).await {
            Ok(new_id) => Ok(new_id),
            Err(e) => {
                tracing::error!(
                    service = %id,
                    error = %e,
                    "re-create under new name failed, restoring"
                );
                self.create(current).await?;
                Err(e)
            }
        }
    }

    async fn remove_container(&self, id: &ContainerId, _force: bool) -> Result<(), ContainerError> {
        self.client
            .delete_service(id.as_str())
            .await
            .map_err(map_service_error)
    }
}
