// ABOUTME: In-process runtime that keeps containers and a registry in memory.
// ABOUTME: Records every call and injects failures per operation and target.

use crate::runtime::traits::sealed::Sealed;
use crate::runtime::traits::{
    ContainerError, ContainerFilters, ContainerOps, ContainerRecord, ContainerSpec,
    ContainerState, ContainerStatus, ImageError, ImageOps, RuntimeInfo, RuntimeInfoError,
    RuntimeMetadata,
};
use crate::runtime::RuntimeMode;
use crate::types::{ContainerId, ContainerName, Digest, ImageId, ImageRef};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

/// Runtime operations as seen by the call log and fault table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Resolve,
    Inspect,
    Status,
    Create,
    Start,
    Stop,
    Rename,
    Remove,
    RemoveImage,
    /// Not a call: a started container with this fault exits immediately.
    Crash,
}

impl Operation {
    /// Operations that change the host.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            Operation::Create
                | Operation::Start
                | Operation::Stop
                | Operation::Rename
                | Operation::Remove
                | Operation::RemoveImage
        )
    }
}

/// One logged call. `target` is the container name at call time, or the image
/// reference for `Resolve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub operation: Operation,
    pub target: String,
}

/// Declarative description of a container to seed the runtime with.
#[derive(Debug, Clone)]
pub struct ContainerFixture {
    name: String,
    image: String,
    running: bool,
    labels: HashMap<String, String>,
    links: Vec<String>,
    env: Vec<String>,
}

impl ContainerFixture {
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            running: true,
            labels: HashMap::new(),
            links: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn stopped(mut self) -> Self {
        self.running = false;
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Legacy link to another container, aliased by its own name.
    pub fn link(mut self, target: &str) -> Self {
        self.links.push(format!("{target}:{target}"));
        self
    }

    pub fn env(mut self, entry: &str) -> Self {
        self.env.push(entry.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct Fault {
    message: String,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Debug, Clone)]
struct MemoryContainer {
    id: ContainerId,
    spec: ContainerSpec,
    digest: Digest,
    state: ContainerState,
}

impl MemoryContainer {
    fn record(&self) -> ContainerRecord {
        let mut links: BTreeSet<ContainerName> = self
            .spec
            .links
            .iter()
            .filter_map(|l| l.split(':').next())
            .filter_map(|n| ContainerName::new(n).ok())
            .collect();
        if let Some(target) = self
            .spec
            .network_mode
            .as_deref()
            .and_then(|m| m.strip_prefix("container:"))
            .and_then(|n| ContainerName::new(n).ok())
        {
            links.insert(target);
        }
        ContainerRecord {
            id: self.id.clone(),
            name: self.spec.name.clone(),
            image: self.spec.image.clone(),
            image_id: ImageId::new(self.digest.as_str()),
            digest: Some(self.digest.clone()),
            links,
            labels: self.spec.labels.clone(),
            state: self.state,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    containers: BTreeMap<String, MemoryContainer>,
    registry: HashMap<String, Digest>,
    next_id: u64,
    calls: Vec<RuntimeCall>,
    faults: HashMap<(Operation, String), Fault>,
    removed_images: Vec<ImageId>,
    unreachable: bool,
}

impl MemoryState {
    fn log(&mut self, operation: Operation, target: &str) -> Result<(), String> {
        self.calls.push(RuntimeCall {
            operation,
            target: target.to_string(),
        });
        match self.take_fault(operation, target) {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    fn take_fault(&mut self, operation: Operation, target: &str) -> Option<String> {
        let key = (operation, target.to_string());
        let fault = self.faults.get_mut(&key)?;
        let message = fault.message.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.faults.remove(&key);
            }
        }
        Some(message)
    }

    fn by_id(&mut self, id: &ContainerId) -> Result<&mut MemoryContainer, ContainerError> {
        self.containers
            .get_mut(id.as_str())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }

    fn name_of(&self, id: &ContainerId) -> String {
        self.containers
            .get(id.as_str())
            .map(|c| c.spec.name.to_string())
            .unwrap_or_else(|| id.to_string())
    }

    fn name_taken(&self, name: &ContainerName) -> bool {
        self.containers.values().any(|c| &c.spec.name == name)
    }

    fn allocate_id(&mut self) -> ContainerId {
        self.next_id += 1;
        ContainerId::new(format!("{:016x}{:048x}", self.next_id, self.next_id))
    }

    fn registry_digest(&self, image: &ImageRef) -> Option<Digest> {
        self.registry.get(&image.without_digest().to_string()).cloned()
    }
}

/// A runtime whose whole state lives in this process.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    state: Mutex<MemoryState>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `digest` the one `image` resolves to.
    pub fn publish(&self, image: &str, digest: &str) {
        let (Ok(image), Ok(digest)) = (ImageRef::parse(image), Digest::parse(digest)) else {
            tracing::warn!(image, digest, "ignoring malformed publish");
            return;
        };
        self.state
            .lock()
            .registry
            .insert(image.without_digest().to_string(), digest);
    }

    /// Add a container running whatever its image currently resolves to.
    pub fn add(&self, fixture: ContainerFixture) -> Result<ContainerId, ContainerError> {
        let name = ContainerName::new(&fixture.name)
            .map_err(|e| ContainerError::InvalidConfig(e.to_string()))?;
        let image = ImageRef::parse(&fixture.image)
            .map_err(|e| ContainerError::InvalidConfig(e.to_string()))?;
        let mut state = self.state.lock();
        if state.name_taken(&name) {
            return Err(ContainerError::AlreadyExists(name.to_string()));
        }
        let digest = match image.digest() {
            Some(pinned) => Digest::parse(pinned).ok(),
            None => state.registry_digest(&image),
        }
        .ok_or_else(|| ContainerError::ImageNotFound(image.to_string()))?;

        let mut spec = ContainerSpec::new(name, image);
        spec.labels = fixture.labels;
        spec.links = fixture.links;
        spec.env = fixture.env;
        let id = state.allocate_id();
        state.containers.insert(
            id.to_string(),
            MemoryContainer {
                id: id.clone(),
                spec,
                digest,
                state: if fixture.running {
                    ContainerState::Running
                } else {
                    ContainerState::Exited
                },
            },
        );
        Ok(id)
    }

    /// Fail `operation` whenever it targets `target`.
    pub fn fail(&self, operation: Operation, target: &str) {
        self.inject(operation, target, None);
    }

    /// Fail only the next `operation` that targets `target`.
    pub fn fail_once(&self, operation: Operation, target: &str) {
        self.inject(operation, target, Some(1));
    }

    fn inject(&self, operation: Operation, target: &str, remaining: Option<u32>) {
        self.state.lock().faults.insert(
            (operation, target.to_string()),
            Fault {
                message: format!("injected {operation:?} failure for {target}"),
                remaining,
            },
        );
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Simulate the engine going away.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Delay listing and resolution, to hold a session open.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<RuntimeCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation.is_mutation())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Current record for the container with this name.
    pub fn container(&self, name: &str) -> Option<ContainerRecord> {
        self.state
            .lock()
            .containers
            .values()
            .find(|c| c.spec.name.as_str() == name)
            .map(MemoryContainer::record)
    }

    /// Names of all containers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .containers
            .values()
            .map(|c| c.spec.name.to_string())
            .collect();
        names.sort();
        names
    }

    pub fn removed_images(&self) -> Vec<ImageId> {
        self.state.lock().removed_images.clone()
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Sealed for MemoryRuntime {}

#[async_trait]
impl RuntimeInfo for MemoryRuntime {
    fn mode(&self) -> RuntimeMode {
        RuntimeMode::Standalone
    }

    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError> {
        self.ping().await?;
        Ok(RuntimeMetadata {
            name: "memory".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: "n/a".to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        })
    }

    async fn ping(&self) -> Result<(), RuntimeInfoError> {
        if self.state.lock().unreachable {
            return Err(RuntimeInfoError::ConnectionFailed("memory runtime offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageOps for MemoryRuntime {
    async fn resolve_latest_digest(&self, reference: &ImageRef) -> Result<Digest, ImageError> {
        self.delay().await;
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(ImageError::Runtime("memory runtime offline".into()));
        }
        state
            .log(Operation::Resolve, &reference.to_string())
            .map_err(ImageError::PullFailed)?;
        state
            .registry_digest(reference)
            .ok_or_else(|| ImageError::NotFound(reference.to_string()))
    }

    async fn remove_image(&self, id: &ImageId, _force: bool) -> Result<(), ImageError> {
        let mut state = self.state.lock();
        state
            .log(Operation::RemoveImage, id.as_str())
            .map_err(ImageError::Runtime)?;
        let in_use = state
            .containers
            .values()
            .any(|c| c.digest.as_str() == id.as_str());
        if in_use {
            return Err(ImageError::InUse(id.to_string()));
        }
        state.removed_images.push(id.clone());
        Ok(())
    }
}

#[async_trait]
impl ContainerOps for MemoryRuntime {
    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerRecord>, ContainerError> {
        self.delay().await;
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(ContainerError::Unreachable("memory runtime offline".into()));
        }
        state
            .log(Operation::List, "*")
            .map_err(ContainerError::Unreachable)?;
        Ok(state
            .containers
            .values()
            .map(MemoryContainer::record)
            .filter(|r| filters.all || r.is_running())
            .filter(|r| {
                filters
                    .labels
                    .iter()
                    .all(|(k, v)| r.labels.get(k) == Some(v))
            })
            .collect())
    }

    async fn inspect_spec(&self, id: &ContainerId) -> Result<ContainerSpec, ContainerError> {
        let mut state = self.state.lock();
        let name = state.name_of(id);
        state
            .log(Operation::Inspect, &name)
            .map_err(ContainerError::Runtime)?;
        Ok(state.by_id(id)?.spec.clone())
    }

    async fn container_status(&self, id: &ContainerId) -> Result<ContainerStatus, ContainerError> {
        let mut state = self.state.lock();
        let name = state.name_of(id);
        state
            .log(Operation::Status, &name)
            .map_err(ContainerError::Runtime)?;
        Ok(ContainerStatus {
            state: state.by_id(id)?.state,
            health: None,
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError> {
        let mut state = self.state.lock();
        state
            .log(Operation::Create, spec.name.as_str())
            .map_err(ContainerError::Runtime)?;
        if state.name_taken(&spec.name) {
            return Err(ContainerError::AlreadyExists(spec.name.to_string()));
        }
        let digest = state
            .registry_digest(&spec.image)
            .ok_or_else(|| ContainerError::ImageNotFound(spec.image.to_string()))?;
        let id = state.allocate_id();
        state.containers.insert(
            id.to_string(),
            MemoryContainer {
                id: id.clone(),
                spec: spec.clone(),
                digest,
                state: ContainerState::Created,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        let name = state.name_of(id);
        state
            .log(Operation::Start, &name)
            .map_err(ContainerError::Runtime)?;
        let crashes = state.take_fault(Operation::Crash, &name).is_some();
        state.by_id(id)?.state = if crashes {
            ContainerState::Exited
        } else {
            ContainerState::Running
        };
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        _timeout: Duration,
    ) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        let name = state.name_of(id);
        state
            .log(Operation::Stop, &name)
            .map_err(ContainerError::Runtime)?;
        state.by_id(id)?.state = ContainerState::Exited;
        Ok(())
    }

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &ContainerName,
    ) -> Result<ContainerId, ContainerError> {
        let mut state = self.state.lock();
        let name = state.name_of(id);
        state
            .log(Operation::Rename, &name)
            .map_err(ContainerError::Runtime)?;
        if state.name_taken(new_name) {
            return Err(ContainerError::AlreadyExists(new_name.to_string()));
        }
        state.by_id(id)?.spec.name = new_name.clone();
        Ok(id.clone())
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        let name = state.name_of(id);
        state
            .log(Operation::Remove, &name)
            .map_err(ContainerError::Runtime)?;
        let running = state.by_id(id)?.state == ContainerState::Running;
        if running && !force {
            return Err(ContainerError::Runtime(format!(
                "cannot remove running container {name}"
            )));
        }
        state.containers.remove(id.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn created_container_runs_published_digest() {
        let runtime = MemoryRuntime::new();
        runtime.publish("nginx:1", "sha256:aa");
        runtime.add(ContainerFixture::new("web", "nginx:1")).unwrap();
        runtime.publish("nginx:1", "sha256:bb");

        let old = runtime.container("web").unwrap();
        assert_eq!(old.digest.unwrap().as_str(), "sha256:aa");

        let spec = ContainerSpec::new(
            ContainerName::new("web2").unwrap(),
            ImageRef::parse("nginx:1").unwrap(),
        );
        runtime.create_container(&spec).await.unwrap();
        let new = runtime.container("web2").unwrap();
        assert_eq!(new.digest.unwrap().as_str(), "sha256:bb");
        assert_eq!(new.state, ContainerState::Created);
    }

    #[tokio::test]
    async fn rename_refuses_taken_names() {
        let runtime = MemoryRuntime::new();
        runtime.publish("redis:7", "sha256:01");
        let a = runtime.add(ContainerFixture::new("a", "redis:7")).unwrap();
        runtime.add(ContainerFixture::new("b", "redis:7")).unwrap();

        let err = runtime
            .rename_container(&a, &ContainerName::new("b").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn injected_fault_is_logged_and_returned() {
        let runtime = MemoryRuntime::new();
        runtime.publish("redis:7", "sha256:01");
        let id = runtime.add(ContainerFixture::new("cache", "redis:7")).unwrap();
        runtime.fail(Operation::Stop, "cache");

        let err = runtime
            .stop_container(&id, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("injected"));
        assert_eq!(runtime.mutations().len(), 1);
        assert!(runtime.container("cache").unwrap().is_running());
    }

    #[tokio::test]
    async fn links_become_record_dependencies() {
        let runtime = MemoryRuntime::new();
        runtime.publish("app:1", "sha256:0a");
        runtime
            .add(ContainerFixture::new("web", "app:1").link("db"))
            .unwrap();
        let record = runtime.container("web").unwrap();
        assert!(record.links.contains(&ContainerName::new("db").unwrap()));
    }
}
