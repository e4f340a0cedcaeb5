// ABOUTME: The `notifications` section: channels and delivery limits.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::EnvValue;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Also notify for sessions where nothing was updated or failed.
    pub notify_on_empty: bool,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub concurrency: usize,
    pub channels: Vec<ChannelConfig>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        NotificationsConfig {
            notify_on_empty: false,
            timeout: Duration::from_secs(10),
            concurrency: 4,
            channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Webhook {
        #[serde(default)]
        name: Option<String>,
        url: EnvValue,
        #[serde(default)]
        headers: HashMap<String, EnvValue>,
    },
    Log {
        #[serde(default)]
        name: Option<String>,
    },
}

impl ChannelConfig {
    /// Configured name, or the channel type plus its position.
    pub fn name(&self, index: usize) -> String {
        let (name, kind) = match self {
            ChannelConfig::Webhook { name, .. } => (name, "webhook"),
            ChannelConfig::Log { name } => (name, "log"),
        };
        name.clone().unwrap_or_else(|| format!("{kind}-{index}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_tagged_by_type() {
        let config: NotificationsConfig = serde_yaml::from_str(
            r#"
channels:
  - type: webhook
    url: { env: HOOK_URL }
    headers:
      X-Team: ops
  - type: log
    name: audit
"#,
        )
        .unwrap();
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].name(0), "webhook-0");
        assert_eq!(config.channels[1].name(1), "audit");
        assert_eq!(config.concurrency, 4);
    }
}
