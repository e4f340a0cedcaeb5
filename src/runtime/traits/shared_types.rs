// ABOUTME: Shared types used across runtime trait definitions.
// ABOUTME: ContainerRecord snapshots, ContainerSpec for recreation, status and metadata.

use crate::types::{ContainerId, ContainerName, Digest, ImageId, ImageRef};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// One container as seen by a single scan.
///
/// Records are snapshots: they are rebuilt on every session and never
/// mutated after the listing call returns.
#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub name: ContainerName,
    /// Reference the container was created from.
    pub image: ImageRef,
    /// Local image the container runs.
    pub image_id: ImageId,
    /// Digest comparable with `ImageOps::resolve_latest_digest`. `None` when
    /// the runtime cannot tell, which the comparator treats as stale.
    pub digest: Option<Digest>,
    /// Containers this one links to or shares a network namespace with.
    pub links: BTreeSet<ContainerName>,
    pub labels: HashMap<String, String>,
    pub state: ContainerState,
}

impl ContainerRecord {
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// A boolean label. Anything other than true/false (any case) is ignored.
    pub fn label_flag(&self, key: &str) -> Option<bool> {
        let value = self.label(key)?.trim();
        if value.eq_ignore_ascii_case("true") {
            Some(true)
        } else if value.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            None
        }
    }
}

/// Resolved configuration of a container, used to create its replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: ContainerName,
    pub image: ImageRef,
    /// `KEY=value` entries, in the order the runtime reported them.
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    pub restart_policy: RestartPolicyConfig,
    pub healthcheck: Option<HealthcheckConfig>,
    pub stop_signal: Option<String>,
    pub stop_timeout: Option<Duration>,
    /// `bridge`, `host`, `container:<name>`, or a user network name.
    pub network_mode: Option<String>,
    pub networks: Vec<NetworkAttachment>,
    /// Legacy links in `name:alias` form.
    pub links: Vec<String>,
    /// Replica count for swarm services.
    pub replicas: Option<u64>,
}

impl ContainerSpec {
    /// Minimal spec: everything else takes the image's defaults.
    pub fn new(name: ContainerName, image: ImageRef) -> Self {
        Self {
            name,
            image,
            env: Vec::new(),
            labels: HashMap::new(),
            command: None,
            entrypoint: None,
            working_dir: None,
            user: None,
            hostname: None,
            ports: Vec::new(),
            volumes: Vec::new(),
            restart_policy: RestartPolicyConfig::default(),
            healthcheck: None,
            stop_signal: None,
            stop_timeout: None,
            network_mode: None,
            networks: Vec::new(),
            links: Vec::new(),
            replicas: None,
        }
    }

    /// The same configuration pointed at another image.
    pub fn with_image(&self, image: ImageRef) -> Self {
        Self {
            image,
            ..self.clone()
        }
    }

    /// Drop settings the old image supplied so the new image's defaults win.
    ///
    /// A container inspected from the engine reports the merge of image and
    /// user settings. Recreating it verbatim would freeze the old image's env,
    /// command and labels into the new container.
    pub fn strip_image_defaults(&mut self, defaults: &ImageDefaults) {
        self.env.retain(|entry| !defaults.env.contains(entry));
        if self.command.is_some() && self.command == defaults.command {
            self.command = None;
        }
        if self.entrypoint.is_some() && self.entrypoint == defaults.entrypoint {
            self.entrypoint = None;
        }
        self.labels
            .retain(|key, value| defaults.labels.get(key) != Some(value));
        if self.working_dir.is_some() && self.working_dir == defaults.working_dir {
            self.working_dir = None;
        }
        if self.user.is_some() && self.user == defaults.user {
            self.user = None;
        }
        if self.healthcheck.is_some() && self.healthcheck == defaults.healthcheck {
            self.healthcheck = None;
        }
    }
}

/// Settings baked into an image, as reported by image inspection.
#[derive(Debug, Clone, Default)]
pub struct ImageDefaults {
    pub env: Vec<String>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub labels: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub healthcheck: Option<HealthcheckConfig>,
}

/// Membership in a user-defined network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    pub aliases: Vec<String>,
}

/// Port mapping configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Host port; `None` for an exposed-only port.
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
    pub host_ip: Option<String>,
}

/// Network protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "udp" => Protocol::Udp,
            "sctp" => Protocol::Sctp,
            _ => Protocol::Tcp,
        }
    }
}

/// Kind of mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MountKind {
    #[default]
    Bind,
    Volume,
    Tmpfs,
}

/// Volume mount configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub kind: MountKind,
    /// Host path or volume name. Empty for tmpfs.
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Restart policy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RestartPolicyConfig {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure { max_retries: Option<u32> },
}

/// Healthcheck configuration for a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthcheckConfig {
    pub test: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Duration,
}

/// Container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

/// Health state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
    None,
}

/// What a post-start liveness check looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerStatus {
    pub state: ContainerState,
    pub health: Option<HealthState>,
}

impl ContainerStatus {
    /// Running, and not reported unhealthy by its own healthcheck.
    pub fn is_live(&self) -> bool {
        self.state == ContainerState::Running && self.health != Some(HealthState::Unhealthy)
    }
}

/// Runtime metadata.
#[derive(Debug, Clone)]
pub struct RuntimeMetadata {
    /// Runtime name, e.g. "docker" or "docker swarm".
    pub name: String,
    pub version: String,
    pub api_version: String,
    pub os: String,
    pub arch: String,
}
