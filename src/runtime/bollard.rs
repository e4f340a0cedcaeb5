// ABOUTME: Bollard-based runtime for a standalone Docker engine.
// ABOUTME: Builds container records and recreation specs from inspect output.

use crate::runtime::traits::sealed::Sealed;
use crate::runtime::traits::{
    ContainerError, ContainerFilters, ContainerOps, ContainerRecord, ContainerSpec,
    ContainerState, ContainerStatus, HealthState, HealthcheckConfig, ImageDefaults, ImageError,
    ImageOps, MountKind, NetworkAttachment, PortMapping, Protocol, RestartPolicyConfig,
    RuntimeInfo, RuntimeInfoError, RuntimeMetadata, VolumeMount,
};
use crate::runtime::RuntimeMode;
use crate::types::{ContainerId, ContainerName, Digest, ImageId, ImageRef};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, EndpointSettings, HealthConfig, HostConfig,
    Mount, MountTypeEnum, NetworkingConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RemoveImageOptions, RenameContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn map_image_pull_error(e: bollard::errors::Error, image_name: &str) -> ImageError {
    match &e {
        bollard::errors::Error::DockerResponseServerError { status_code, .. }
            if *status_code == 404 =>
        {
            ImageError::NotFound(image_name.to_string())
        }
        _ => ImageError::PullFailed(format!("{}: {}", image_name, e)),
    }
}

fn map_image_inspect_error(e: bollard::errors::Error, image_name: &str) -> ImageError {
    match &e {
        bollard::errors::Error::DockerResponseServerError { status_code, .. }
            if *status_code == 404 =>
        {
            ImageError::NotFound(image_name.to_string())
        }
        _ => ImageError::Runtime(format!("failed to inspect {}: {}", image_name, e)),
    }
}

fn map_image_remove_error(e: bollard::errors::Error, image_name: &str) -> ImageError {
    match &e {
        bollard::errors::Error::DockerResponseServerError { status_code, .. }
            if *status_code == 404 =>
        {
            ImageError::NotFound(image_name.to_string())
        }
        bollard::errors::Error::DockerResponseServerError { status_code, .. }
            if *status_code == 409 =>
        {
            ImageError::InUse(image_name.to_string())
        }
        _ => ImageError::Runtime(format!("failed to remove {}: {}", image_name, e)),
    }
}

fn map_container_create_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::ImageNotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 409 => ContainerError::AlreadyExists(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 400 => ContainerError::InvalidConfig(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_stop_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::NotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 304 => ContainerError::NotRunning(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_not_found_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::NotFound(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_rename_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 404 => ContainerError::NotFound(message.clone()),
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } if *status_code == 409 => ContainerError::AlreadyExists(message.clone()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

/// Any error that means the engine did not answer at all.
fn map_list_error(e: bollard::errors::Error) -> ContainerError {
    match &e {
        bollard::errors::Error::DockerResponseServerError { message, .. } => {
            ContainerError::Runtime(message.clone())
        }
        _ => ContainerError::Unreachable(e.to_string()),
    }
}

// =============================================================================
// Inspect Conversions
// =============================================================================

/// Split a `HostConfig.Links` entry (`/db:/web/database`) into target name and alias.
pub(crate) fn parse_link(entry: &str) -> Option<(String, String)> {
    let (target, alias_path) = entry.split_once(':')?;
    let target = target.trim_start_matches('/');
    let alias = alias_path.rsplit('/').next()?;
    if target.is_empty() || alias.is_empty() {
        return None;
    }
    Some((target.to_string(), alias.to_string()))
}

/// Parse a `HostConfig.Binds` entry (`src:dst[:opts]`).
pub(crate) fn parse_bind(entry: &str) -> Option<VolumeMount> {
    let mut parts = entry.splitn(3, ':');
    let source = parts.next()?;
    let target = parts.next()?;
    let options = parts.next().unwrap_or("");
    if source.is_empty() || target.is_empty() {
        return None;
    }
    let kind = if source.starts_with('/') || source.starts_with('.') {
        MountKind::Bind
    } else {
        MountKind::Volume
    };
    Some(VolumeMount {
        kind,
        source: source.to_string(),
        target: target.to_string(),
        read_only: options.split(',').any(|o| o == "ro"),
    })
}

fn bind_string(mount: &VolumeMount) -> String {
    if mount.read_only {
        format!("{}:{}:ro", mount.source, mount.target)
    } else {
        format!("{}:{}", mount.source, mount.target)
    }
}

/// Parse a port map key like `8080/tcp`.
fn parse_port_key(key: &str) -> Option<(u16, Protocol)> {
    let (port, proto) = key.split_once('/').unwrap_or((key, "tcp"));
    Some((port.parse().ok()?, Protocol::parse(proto)))
}

fn map_state(status: Option<bollard::models::ContainerStateStatusEnum>) -> ContainerState {
    use bollard::models::ContainerStateStatusEnum as S;
    match status {
        Some(S::CREATED) => ContainerState::Created,
        Some(S::RUNNING) => ContainerState::Running,
        Some(S::PAUSED) => ContainerState::Paused,
        Some(S::RESTARTING) => ContainerState::Restarting,
        Some(S::REMOVING) => ContainerState::Removing,
        Some(S::DEAD) => ContainerState::Dead,
        _ => ContainerState::Exited,
    }
}

fn status_from_inspect(details: &ContainerInspectResponse) -> ContainerStatus {
    let state = map_state(details.state.as_ref().and_then(|s| s.status));
    let health = details
        .state
        .as_ref()
        .and_then(|s| s.health.as_ref())
        .and_then(|h| h.status)
        .map(|s| match s {
            bollard::models::HealthStatusEnum::STARTING => HealthState::Starting,
            bollard::models::HealthStatusEnum::HEALTHY => HealthState::Healthy,
            bollard::models::HealthStatusEnum::UNHEALTHY => HealthState::Unhealthy,
            _ => HealthState::None,
        });
    ContainerStatus { state, health }
}

fn healthcheck_from(config: &HealthConfig) -> Option<HealthcheckConfig> {
    let test = config.test.clone()?;
    let nanos = |v: Option<i64>| Duration::from_nanos(v.unwrap_or(0).max(0) as u64);
    Some(HealthcheckConfig {
        test,
        interval: nanos(config.interval),
        timeout: nanos(config.timeout),
        retries: config.retries.unwrap_or(0).max(0) as u32,
        start_period: nanos(config.start_period),
    })
}

fn restart_policy_from(host: &HostConfig) -> RestartPolicyConfig {
    let Some(policy) = host.restart_policy.as_ref() else {
        return RestartPolicyConfig::No;
    };
    match policy.name {
        Some(RestartPolicyNameEnum::ALWAYS) => RestartPolicyConfig::Always,
        Some(RestartPolicyNameEnum::UNLESS_STOPPED) => RestartPolicyConfig::UnlessStopped,
        Some(RestartPolicyNameEnum::ON_FAILURE) => RestartPolicyConfig::OnFailure {
            max_retries: policy
                .maximum_retry_count
                .filter(|n| *n > 0)
                .map(|n| n as u32),
        },
        _ => RestartPolicyConfig::No,
    }
}

fn mounts_from(host: &HostConfig) -> Vec<VolumeMount> {
    let mut volumes: Vec<VolumeMount> = host
        .binds
        .iter()
        .flatten()
        .filter_map(|b| parse_bind(b))
        .collect();
    for mount in host.mounts.iter().flatten() {
        let kind = match mount.typ {
            Some(MountTypeEnum::VOLUME) => MountKind::Volume,
            Some(MountTypeEnum::TMPFS) => MountKind::Tmpfs,
            _ => MountKind::Bind,
        };
        volumes.push(VolumeMount {
            kind,
            source: mount.source.clone().unwrap_or_default(),
            target: mount.target.clone().unwrap_or_default(),
            read_only: mount.read_only.unwrap_or(false),
        });
    }
    volumes
}

fn ports_from(host: &HostConfig) -> Vec<PortMapping> {
    let mut ports = Vec::new();
    for (key, bindings) in host.port_bindings.iter().flatten() {
        let Some((container_port, protocol)) = parse_port_key(key) else {
            continue;
        };
        match bindings.as_deref() {
            Some(bindings) if !bindings.is_empty() => {
                for binding in bindings {
                    ports.push(PortMapping {
                        host_port: binding.host_port.as_deref().and_then(|p| p.parse().ok()),
                        container_port,
                        protocol,
                        host_ip: binding.host_ip.clone().filter(|ip| !ip.is_empty()),
                    });
                }
            }
            _ => ports.push(PortMapping {
                host_port: None,
                container_port,
                protocol,
                host_ip: None,
            }),
        }
    }
    ports.sort_by_key(|p| (p.container_port, p.host_port));
    ports
}

fn container_name_of(details: &ContainerInspectResponse) -> Result<ContainerName, ContainerError> {
    let raw = details.name.as_deref().unwrap_or_default();
    ContainerName::new(raw).map_err(|e| ContainerError::InvalidConfig(format!("{raw}: {e}")))
}

fn image_ref_of(details: &ContainerInspectResponse) -> Result<ImageRef, ContainerError> {
    let raw = details
        .config
        .as_ref()
        .and_then(|c| c.image.as_deref())
        .unwrap_or_default();
    if raw.starts_with("sha256:") {
        return Err(ContainerError::InvalidConfig(format!(
            "created from bare image id {raw}"
        )));
    }
    ImageRef::parse(raw).map_err(|e| ContainerError::InvalidConfig(format!("{raw}: {e}")))
}

/// Build a record. `names_by_id` resolves `container:<id>` network modes.
fn record_from_inspect(
    details: &ContainerInspectResponse,
    names_by_id: &HashMap<String, String>,
) -> Result<ContainerRecord, ContainerError> {
    let id = details.id.clone().unwrap_or_default();
    let name = container_name_of(details)?;
    let image = image_ref_of(details)?;
    let image_id = details.image.clone().unwrap_or_default();

    let mut links = BTreeSet::new();
    if let Some(host) = details.host_config.as_ref() {
        for entry in host.links.iter().flatten() {
            if let Some((target, _)) = parse_link(entry)
                && let Ok(target) = ContainerName::new(&target)
            {
                links.insert(target);
            }
        }
        if let Some(mode) = host.network_mode.as_deref()
            && let Some(target) = mode.strip_prefix("container:")
        {
            let target = names_by_id
                .iter()
                .find(|(id, _)| id.starts_with(target))
                .map(|(_, name)| name.as_str())
                .unwrap_or(target);
            if let Ok(target) = ContainerName::new(target) {
                links.insert(target);
            }
        }
    }

    Ok(ContainerRecord {
        id: ContainerId::new(id),
        name,
        image,
        digest: Digest::parse(&image_id).ok(),
        image_id: ImageId::new(image_id),
        links,
        labels: details
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default(),
        state: status_from_inspect(details).state,
    })
}

fn spec_from_inspect(details: &ContainerInspectResponse) -> Result<ContainerSpec, ContainerError> {
    let mut spec = ContainerSpec::new(container_name_of(details)?, image_ref_of(details)?);
    let short_id = details
        .id
        .as_deref()
        .map(|id| ContainerId::new(id).short().to_string())
        .unwrap_or_default();

    if let Some(config) = details.config.as_ref() {
        spec.env = config.env.clone().unwrap_or_default();
        spec.labels = config.labels.clone().unwrap_or_default();
        spec.command = config.cmd.clone();
        spec.entrypoint = config.entrypoint.clone();
        spec.working_dir = config.working_dir.clone().filter(|s| !s.is_empty());
        spec.user = config.user.clone().filter(|s| !s.is_empty());
        // The engine defaults the hostname to the short id; a new one gets its own.
        spec.hostname = config
            .hostname
            .clone()
            .filter(|h| !h.is_empty() && *h != short_id);
        spec.healthcheck = config.healthcheck.as_ref().and_then(healthcheck_from);
        spec.stop_signal = config.stop_signal.clone();
        spec.stop_timeout = config
            .stop_timeout
            .filter(|t| *t >= 0)
            .map(|t| Duration::from_secs(t as u64));
    }

    if let Some(host) = details.host_config.as_ref() {
        spec.volumes = mounts_from(host);
        spec.ports = ports_from(host);
        spec.restart_policy = restart_policy_from(host);
        spec.network_mode = host.network_mode.clone().filter(|m| !m.is_empty());
        spec.links = host
            .links
            .iter()
            .flatten()
            .filter_map(|l| parse_link(l))
            .map(|(target, alias)| format!("{target}:{alias}"))
            .collect();
    }

    let mut networks: Vec<NetworkAttachment> = details
        .network_settings
        .as_ref()
        .and_then(|n| n.networks.as_ref())
        .into_iter()
        .flatten()
        .map(|(network, endpoint)| NetworkAttachment {
            network: network.clone(),
            aliases: endpoint
                .aliases
                .iter()
                .flatten()
                .filter(|a| **a != short_id)
                .cloned()
                .collect(),
        })
        .collect();
    networks.sort_by(|a, b| a.network.cmp(&b.network));
    spec.networks = networks;

    Ok(spec)
}

fn restart_policy_to(policy: &RestartPolicyConfig) -> RestartPolicy {
    RestartPolicy {
        name: Some(match policy {
            RestartPolicyConfig::No => RestartPolicyNameEnum::NO,
            RestartPolicyConfig::Always => RestartPolicyNameEnum::ALWAYS,
            RestartPolicyConfig::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
            RestartPolicyConfig::OnFailure { .. } => RestartPolicyNameEnum::ON_FAILURE,
        }),
        maximum_retry_count: match policy {
            RestartPolicyConfig::OnFailure { max_retries } => max_retries.map(i64::from),
            _ => None,
        },
    }
}

/// Network modes that cannot carry endpoint settings.
fn is_shared_network_mode(mode: Option<&str>) -> bool {
    matches!(mode, Some("host") | Some("none")) || mode.is_some_and(|m| m.starts_with("container:"))
}

fn create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let mut binds = Vec::new();
    let mut mounts = Vec::new();
    for volume in &spec.volumes {
        match volume.kind {
            MountKind::Bind => binds.push(bind_string(volume)),
            MountKind::Volume | MountKind::Tmpfs => mounts.push(Mount {
                source: Some(volume.source.clone()).filter(|s| !s.is_empty()),
                target: Some(volume.target.clone()),
                typ: Some(if volume.kind == MountKind::Volume {
                    MountTypeEnum::VOLUME
                } else {
                    MountTypeEnum::TMPFS
                }),
                read_only: Some(volume.read_only),
                ..Default::default()
            }),
        }
    }

    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: Vec<String> = Vec::new();
    for port in &spec.ports {
        let key = format!("{}/{}", port.container_port, port.protocol.as_str());
        if !exposed_ports.contains(&key) {
            exposed_ports.push(key.clone());
        }
        if let Some(host_port) = port.host_port {
            port_bindings
                .entry(key)
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(PortBinding {
                    host_ip: port.host_ip.clone(),
                    host_port: Some(host_port.to_string()),
                });
        }
    }

    let host_config = HostConfig {
        binds: Some(binds).filter(|b| !b.is_empty()),
        mounts: Some(mounts).filter(|m| !m.is_empty()),
        port_bindings: Some(port_bindings).filter(|p| !p.is_empty()),
        restart_policy: Some(restart_policy_to(&spec.restart_policy)),
        network_mode: spec.network_mode.clone(),
        links: Some(spec.links.clone()).filter(|l| !l.is_empty()),
        ..Default::default()
    };

    let networking_config = if is_shared_network_mode(spec.network_mode.as_deref())
        || spec.networks.is_empty()
    {
        None
    } else {
        let endpoints: HashMap<String, EndpointSettings> = spec
            .networks
            .iter()
            .map(|n| {
                (
                    n.network.clone(),
                    EndpointSettings {
                        aliases: Some(n.aliases.clone()).filter(|a| !a.is_empty()),
                        ..Default::default()
                    },
                )
            })
            .collect();
        Some(NetworkingConfig {
            endpoints_config: Some(endpoints),
        })
    };

    let healthcheck = spec.healthcheck.as_ref().map(|hc| HealthConfig {
        test: Some(hc.test.clone()),
        interval: Some(hc.interval.as_nanos() as i64),
        timeout: Some(hc.timeout.as_nanos() as i64),
        retries: Some(i64::from(hc.retries)),
        start_period: Some(hc.start_period.as_nanos() as i64),
        start_interval: None,
    });

    ContainerCreateBody {
        image: Some(spec.image.to_string()),
        env: Some(spec.env.clone()).filter(|e| !e.is_empty()),
        labels: Some(spec.labels.clone()).filter(|l| !l.is_empty()),
        cmd: spec.command.clone(),
        entrypoint: spec.entrypoint.clone(),
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        hostname: spec.hostname.clone(),
        stop_signal: spec.stop_signal.clone(),
        stop_timeout: spec.stop_timeout.map(|d| d.as_secs() as i64),
        healthcheck,
        exposed_ports: Some(exposed_ports).filter(|p| !p.is_empty()),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

// =============================================================================
// BollardRuntime
// =============================================================================

/// Runtime for a single Docker engine.
pub struct BollardRuntime {
    client: Docker,
    pull: bool,
}

impl BollardRuntime {
    /// Wrap a connected client. With `pull` off, digests come from the local
    /// image store only.
    pub fn new(client: Docker, pull: bool) -> Self {
        Self { client, pull }
    }

    pub fn client(&self) -> &Docker {
        &self.client
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerInspectResponse, ContainerError> {
        self.client
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(map_container_not_found_error)
    }

    async fn image_defaults(&self, image: &str) -> Result<ImageDefaults, ImageError> {
        let details = self
            .client
            .inspect_image(image)
            .await
            .map_err(|e| map_image_inspect_error(e, image))?;
        Ok(details
            .config
            .map(|c| ImageDefaults {
                env: c.env.unwrap_or_default(),
                command: c.cmd,
                entrypoint: c.entrypoint,
                labels: c.labels.unwrap_or_default(),
                working_dir: c.working_dir.filter(|s| !s.is_empty()),
                user: c.user.filter(|s| !s.is_empty()),
                healthcheck: c.healthcheck.as_ref().and_then(healthcheck_from),
            })
            .unwrap_or_default())
    }
}

/// Pull `reference`, draining the progress stream.
pub(crate) async fn pull(client: &Docker, reference: &ImageRef) -> Result<(), ImageError> {
    let image_name = reference.to_string();
    let opts = CreateImageOptions {
        from_image: Some(image_name.clone()),
        ..Default::default()
    };
    let mut stream = client.create_image(Some(opts), None, None);
    while let Some(result) = stream.next().await {
        result.map_err(|e| map_image_pull_error(e, &image_name))?;
    }
    tracing::debug!(image = %image_name, "pulled");
    Ok(())
}

/// Metadata shared by both engine adapters.
pub(crate) async fn engine_metadata(
    client: &Docker,
    name: &str,
) -> Result<RuntimeMetadata, RuntimeInfoError> {
    let version = client
        .version()
        .await
        .map_err(|e| RuntimeInfoError::ConnectionFailed(e.to_string()))?;
    Ok(RuntimeMetadata {
        name: name.to_string(),
        version: version.version.unwrap_or_default(),
        api_version: version.api_version.unwrap_or_default(),
        os: version.os.unwrap_or_default(),
        arch: version.arch.unwrap_or_default(),
    })
}

impl Sealed for BollardRuntime {}

#[async_trait]
impl RuntimeInfo for BollardRuntime {
    fn mode(&self) -> RuntimeMode {
        RuntimeMode::Standalone
    }

    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError> {
        engine_metadata(&self.client, "docker").await
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
impl ImageOps for BollardRuntime {
    async fn resolve_latest_digest(&self, reference: &ImageRef) -> Result<Digest, ImageError> {
        if self.pull {
            pull(&self.client, reference).await?;
        }
        let image_name = reference.to_string();
        let details = self
            .client
            .inspect_image(&image_name)
            .await
            .map_err(|e| map_image_inspect_error(e, &image_name))?;
        let id = details
            .id
            .ok_or_else(|| ImageError::NoDigest(image_name.clone()))?;
        Digest::parse(&id).map_err(|_| ImageError::NoDigest(image_name))
    }

    async fn remove_image(&self, id: &ImageId, force: bool) -> Result<(), ImageError> {
        let opts = RemoveImageOptions {
            force,
            ..Default::default()
        };
        self.client
            .remove_image(id.as_str(), Some(opts), None)
            .await
            .map_err(|e| map_image_remove_error(e, id.as_str()))?;
        Ok(())
    }
}

#[async_trait]
impl ContainerOps for BollardRuntime {
    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerRecord>, ContainerError> {
        let mut filter_map: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in &filters.labels {
            filter_map
                .entry("label".to_string())
                .or_default()
                .push(format!("{}={}", key, value));
        }

        let opts = ListContainersOptions {
            all: filters.all,
            filters: Some(filter_map),
            ..Default::default()
        };
        let summaries = self
            .client
            .list_containers(Some(opts))
            .await
            .map_err(map_list_error)?;

        let names_by_id: HashMap<String, String> = summaries
            .iter()
            .filter_map(|c| {
                let id = c.id.clone()?;
                let name = c.names.as_ref()?.first()?.trim_start_matches('/').to_string();
                Some((id, name))
            })
            .collect();

        let mut records = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            let details = match self.inspect(&ContainerId::new(id.as_str())).await {
                Ok(details) => details,
                // Removed between list and inspect.
                Err(ContainerError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            match record_from_inspect(&details, &names_by_id) {
                Ok(record) => records.push(record),
                Err(e) => tracing::debug!(container = %id, error = %e, "not tracking container"),
            }
        }
        Ok(records)
    }

    async fn inspect_spec(&self, id: &ContainerId) -> Result<ContainerSpec, ContainerError> {
        let details = self.inspect(id).await?;
        let mut spec = spec_from_inspect(&details)?;
        if let Some(image_id) = details.image.as_deref() {
            match self.image_defaults(image_id).await {
                Ok(defaults) => spec.strip_image_defaults(&defaults),
                Err(e) => {
                    tracing::warn!(
                        container = %spec.name,
                        error = %e,
                        "image defaults unavailable, keeping full config"
                    )
                }
            }
        }
        Ok(spec)
    }

    async fn container_status(&self, id: &ContainerId) -> Result<ContainerStatus, ContainerError> {
        let details = self.inspect(id).await?;
        Ok(status_from_inspect(&details))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError> {
        let opts = CreateContainerOptions {
            name: Some(spec.name.to_string()),
            ..Default::default()
        };
        let response = self
            .client
            .create_container(Some(opts), create_body(spec))
            .await
            .map_err(map_container_create_error)?;
        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        self.client
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(map_container_not_found_error)
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let opts = StopContainerOptions {
            t: Some(timeout.as_secs().min(i32::MAX as u64) as i32),
            signal: None,
        };
        match self.client.stop_container(id.as_str(), Some(opts)).await {
            Ok(()) => Ok(()),
            // 304: already stopped, which is what was asked for.
            Err(e) => match map_container_stop_error(e) {
                ContainerError::NotRunning(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &ContainerName,
    ) -> Result<ContainerId, ContainerError> {
        self.client
            .rename_container(
                id.as_str(),
                RenameContainerOptions {
                    name: new_name.to_string(),
                },
            )
            .await
            .map_err(map_container_rename_error)?;
        Ok(id.clone())
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(map_container_not_found_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_entry_yields_target_and_alias() {
        assert_eq!(
            parse_link("/db:/web/database"),
            Some(("db".to_string(), "database".to_string()))
        );
        assert_eq!(parse_link("garbage"), None);
    }

    #[test]
    fn bind_entry_detects_named_volumes() {
        let bind = parse_bind("/srv/data:/data:ro").unwrap();
        assert_eq!(bind.kind, MountKind::Bind);
        assert!(bind.read_only);

        let volume = parse_bind("pgdata:/var/lib/postgresql/data").unwrap();
        assert_eq!(volume.kind, MountKind::Volume);
        assert!(!volume.read_only);
        assert_eq!(bind_string(&volume), "pgdata:/var/lib/postgresql/data");
    }

    #[test]
    fn port_key_defaults_to_tcp() {
        assert_eq!(parse_port_key("53/udp"), Some((53, Protocol::Udp)));
        assert_eq!(parse_port_key("80"), Some((80, Protocol::Tcp)));
        assert_eq!(parse_port_key("http/tcp"), None);
    }

    #[test]
    fn shared_network_modes_skip_endpoints() {
        assert!(is_shared_network_mode(Some("host")));
        assert!(is_shared_network_mode(Some("container:vpn")));
        assert!(!is_shared_network_mode(Some("backend")));
        assert!(!is_shared_network_mode(None));
    }

    #[test]
    fn create_body_groups_port_bindings() {
        let mut spec = ContainerSpec::new(
            ContainerName::new("web").unwrap(),
            ImageRef::parse("nginx:1.25").unwrap(),
        );
        spec.ports = vec![
            PortMapping {
                host_port: Some(80),
                container_port: 80,
                protocol: Protocol::Tcp,
                host_ip: None,
            },
            PortMapping {
                host_port: Some(8080),
                container_port: 80,
                protocol: Protocol::Tcp,
                host_ip: Some("127.0.0.1".into()),
            },
        ];
        let body = create_body(&spec);
        assert_eq!(body.image.as_deref(), Some("nginx:1.25"));
        let host = body.host_config.unwrap();
        let bindings = host.port_bindings.unwrap();
        assert_eq!(bindings["80/tcp"].as_ref().map(Vec::len), Some(2));
        assert!(body.networking_config.is_none());
    }
}
