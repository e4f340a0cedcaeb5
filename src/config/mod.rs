// ABOUTME: Configuration types and parsing for lookout.yml.
// ABOUTME: Handles discovery, YAML parsing, env overrides and validation.

mod api;
mod deserialize;
mod env_value;
mod init;
mod notify;
mod provider;
mod update;

pub use api::ApiConfig;
pub use deserialize::parse_duration;
pub use env_value::{EnvValue, resolve_env_map};
pub use init::init_config;
pub use notify::{ChannelConfig, NotificationsConfig};
pub use provider::{ProviderConfig, TlsConfig};
pub use update::UpdateConfig;

use crate::error::{Error, Result};
use crate::runtime::Endpoint;
use crate::types::ContainerName;
use deserialize::{default_providers, deserialize_providers};
use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "lookout.yml";
pub const CONFIG_FILENAME_ALT: &str = "lookout.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".lookout/config.yml";

pub const ENV_POLL_INTERVAL: &str = "LOOKOUT_POLL_INTERVAL";
pub const ENV_API_TOKEN: &str = "LOOKOUT_API_TOKEN";
pub const ENV_API_LISTEN: &str = "LOOKOUT_API_LISTEN";
pub const ENV_DOCKER_HOST: &str = "DOCKER_HOST";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(
        default = "default_providers",
        deserialize_with = "deserialize_providers"
    )]
    pub providers: NonEmpty<ProviderConfig>,

    #[serde(default)]
    pub update: UpdateConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            providers: default_providers(),
            update: UpdateConfig::default(),
            api: ApiConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub poll_interval: Option<Duration>,
    pub run_on_start: bool,
    pub monitor_only: bool,
    pub cleanup: bool,
    pub api_listen: Option<SocketAddr>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading configuration");
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Load the explicit path, or discover in `dir` and fall back to defaults.
    pub fn resolve(path: Option<&Path>, dir: &Path) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::discover(dir) {
                Err(Error::ConfigNotFound(_)) => {
                    tracing::info!("no configuration file found, using defaults");
                    Ok(Config::default())
                }
                other => other,
            },
        }
    }

    /// Apply `LOOKOUT_*` and `DOCKER_HOST` from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_var(ENV_POLL_INTERVAL) {
            self.update.poll_interval = parse_duration(&value)
                .map_err(|e| Error::InvalidConfig(format!("{ENV_POLL_INTERVAL}: {e}")))?;
        }
        if let Some(value) = env_var(ENV_API_TOKEN) {
            self.api.token = Some(EnvValue::Literal(value));
        }
        if let Some(value) = env_var(ENV_API_LISTEN) {
            self.api.listen = value
                .parse()
                .map_err(|e| Error::InvalidConfig(format!("{ENV_API_LISTEN}: {e}")))?;
        }
        if let Some(value) = env_var(ENV_DOCKER_HOST) {
            for provider in self.providers.iter_mut().filter(|p| p.host.is_none()) {
                provider.host = Some(value.clone());
            }
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(host) = &overrides.host {
            let mut provider = self.providers.head.clone();
            provider.id = ProviderConfig::default_id(Some(host));
            provider.host = Some(host.clone());
            self.providers = NonEmpty::new(provider);
        }
        if let Some(interval) = overrides.poll_interval {
            self.update.poll_interval = interval;
        }
        if let Some(listen) = overrides.api_listen {
            self.api.enabled = true;
            self.api.listen = listen;
        }
        self.update.run_on_start |= overrides.run_on_start;
        self.update.monitor_only |= overrides.monitor_only;
        self.update.cleanup |= overrides.cleanup;
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for provider in self.providers.iter() {
            if !ids.insert(provider.id.as_str()) {
                return Err(invalid(format!("duplicate provider id: {}", provider.id)));
            }
            let endpoint = provider.endpoint().ok_or_else(|| {
                invalid(format!(
                    "provider {}: unsupported endpoint {}",
                    provider.id,
                    provider.host.as_deref().unwrap_or_default()
                ))
            })?;
            if provider.tls.is_some() && !matches!(endpoint, Endpoint::Tcp(_)) {
                return Err(invalid(format!(
                    "provider {}: tls requires a tcp:// endpoint",
                    provider.id
                )));
            }
        }

        if self.update.worker_limit == 0 {
            return Err(invalid("update.worker_limit must be at least 1"));
        }
        if self.update.poll_interval < Duration::from_secs(1) {
            return Err(invalid("update.poll_interval must be at least 1s"));
        }
        for name in &self.update.containers {
            ContainerName::new(name)
                .map_err(|e| invalid(format!("update.containers: {e}")))?;
        }

        if self.notifications.concurrency == 0 {
            return Err(invalid("notifications.concurrency must be at least 1"));
        }
        for (index, channel) in self.notifications.channels.iter().enumerate() {
            let ChannelConfig::Webhook { url, .. } = channel else {
                continue;
            };
            let Some(url) = url.literal() else {
                continue;
            };
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(format!(
                    "notification channel {}: url must be http(s)",
                    channel.name(index)
                )));
            }
        }
        Ok(())
    }

    pub fn template() -> Self {
        Config::default()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidConfig(message.into())
}
