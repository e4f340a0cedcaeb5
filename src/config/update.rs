// ABOUTME: The `update` section: schedule, replacement behaviour and timeouts.
// ABOUTME: Combined with a provider into the policy a coordinator is built with.

use serde::Deserialize;
use std::time::Duration;

use super::ProviderConfig;
use crate::update::{OptOutPrecedence, Timeouts, UpdatePolicy};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Run a session as soon as the agent starts.
    pub run_on_start: bool,
    pub label_enable: bool,
    pub monitor_only: bool,
    pub cleanup: bool,
    pub restart_dependents: bool,
    pub opt_out_precedence: OptOutPrecedence,
    /// Only these container names are watched. Empty watches all.
    pub containers: Vec<String>,
    pub worker_limit: usize,
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub pull_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        let timeouts = Timeouts::default();
        UpdateConfig {
            poll_interval: Duration::from_secs(24 * 60 * 60),
            run_on_start: false,
            label_enable: false,
            monitor_only: false,
            cleanup: false,
            restart_dependents: false,
            opt_out_precedence: OptOutPrecedence::default(),
            containers: Vec::new(),
            worker_limit: 1,
            stop_timeout: timeouts.stop_grace,
            operation_timeout: timeouts.operation,
            pull_timeout: timeouts.pull,
            settle: timeouts.settle,
        }
    }
}

impl UpdateConfig {
    pub fn policy(&self, provider: &ProviderConfig) -> UpdatePolicy {
        UpdatePolicy {
            watch_stopped: provider.watch_stopped,
            label_enable: self.label_enable,
            monitor_only: self.monitor_only,
            cleanup: self.cleanup,
            restart_dependents: self.restart_dependents,
            opt_out_precedence: self.opt_out_precedence,
            containers: self.containers.iter().cloned().collect(),
            worker_limit: self.worker_limit,
            timeouts: Timeouts {
                stop_grace: self.stop_timeout,
                operation: self.operation_timeout,
                pull: self.pull_timeout,
                settle: self.settle,
            },
        }
    }
}
