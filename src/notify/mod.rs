// ABOUTME: Session notifications: the Notifier capability and the built-in channels.
// ABOUTME: Delivery failures are reported per notifier and never touch the session.

mod fanout;
mod log;
mod render;
mod webhook;

pub use self::log::LogNotifier;
pub use fanout::{Delivery, DeliveryStatus, Fanout};
pub use render::{Message, render};
pub use webhook::WebhookNotifier;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{ChannelConfig, NotificationsConfig, resolve_env_map};
use crate::error::Result;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("endpoint answered {status}")]
    Status { status: u16 },

    #[error("notifier task aborted: {0}")]
    Aborted(String),
}

/// One notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, message: &Message) -> std::result::Result<(), NotifyError>;
}

/// Build the configured channels. Environment references are resolved now.
pub fn from_config(config: &NotificationsConfig) -> Result<Fanout> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::with_capacity(config.channels.len());
    for (index, channel) in config.channels.iter().enumerate() {
        let name = channel.name(index);
        match channel {
            ChannelConfig::Webhook { url, headers, .. } => {
                let url = url.resolve()?;
                let headers = resolve_env_map(headers)?;
                notifiers.push(Arc::new(WebhookNotifier::new(name, url, headers)?));
            }
            ChannelConfig::Log { .. } => notifiers.push(Arc::new(LogNotifier::new(name))),
        }
    }
    Ok(Fanout::new(notifiers, config.timeout, config.concurrency)
        .notify_on_empty(config.notify_on_empty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvValue;
    use crate::error::Error;
    use std::collections::HashMap;

    #[test]
    fn builds_configured_channels() {
        let config = NotificationsConfig {
            channels: vec![
                ChannelConfig::Log { name: None },
                ChannelConfig::Webhook {
                    name: Some("ops".into()),
                    url: EnvValue::from("https://hooks.example.com/lookout"),
                    headers: HashMap::from([("X-Token".to_string(), EnvValue::from("t"))]),
                },
            ],
            ..Default::default()
        };
        let fanout = from_config(&config).unwrap();
        assert_eq!(fanout.names(), vec!["log-0", "ops"]);
    }

    #[test]
    fn unresolved_webhook_url_is_an_error() {
        let config = NotificationsConfig {
            channels: vec![ChannelConfig::Webhook {
                name: None,
                url: EnvValue::FromEnv {
                    var: "LOOKOUT_TEST_NO_SUCH_HOOK".into(),
                    default: None,
                },
                headers: HashMap::new(),
            }],
            ..Default::default()
        };
        temp_env::with_var_unset("LOOKOUT_TEST_NO_SUCH_HOOK", || {
            assert!(matches!(from_config(&config), Err(Error::MissingEnvVar(_))));
        });
    }
}
