// ABOUTME: Concurrent delivery of one session summary to every notifier.
// ABOUTME: Each delivery is bounded by a timeout; a slow or failing channel never blocks the rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{Message, Notifier, NotifyError, render};
use crate::update::SessionResult;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How one delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub notifier: String,
    pub status: DeliveryStatus,
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }
}

pub struct Fanout {
    notifiers: Vec<Arc<dyn Notifier>>,
    timeout: Duration,
    concurrency: usize,
    notify_on_empty: bool,
    host: String,
}

impl std::fmt::Debug for Fanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout")
            .field("notifiers", &self.names())
            .field("timeout", &self.timeout)
            .field("concurrency", &self.concurrency)
            .field("notify_on_empty", &self.notify_on_empty)
            .finish()
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_TIMEOUT, 1)
    }
}

impl Fanout {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>, timeout: Duration, concurrency: usize) -> Self {
        Self {
            notifiers,
            timeout,
            concurrency: concurrency.max(1),
            notify_on_empty: false,
            host: gethostname::gethostname().to_string_lossy().into_owned(),
        }
    }

    /// Also notify for sessions where nothing happened.
    pub fn notify_on_empty(mut self, enabled: bool) -> Self {
        self.notify_on_empty = enabled;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver the session to every notifier and wait for all of them.
    ///
    /// Returns one entry per notifier, in configuration order. Quiet sessions
    /// produce no deliveries unless `notify_on_empty` is set.
    pub async fn dispatch(&self, session: &SessionResult) -> Vec<Delivery> {
        if self.notifiers.is_empty() {
            return Vec::new();
        }
        if session.is_quiet() && !self.notify_on_empty {
            tracing::debug!(session = session.id, "nothing to report, skipping notifications");
            return Vec::new();
        }

        let message = Arc::new(render(session, &self.host));
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::new();

        for (index, notifier) in self.notifiers.iter().enumerate() {
            let notifier = Arc::clone(notifier);
            let message = Arc::clone(&message);
            let permits = Arc::clone(&permits);
            let timeout = self.timeout;
            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let status = deliver(notifier.as_ref(), &message, timeout).await;
                (index, status)
            });
            spawned.insert(handle.id(), index);
        }

        let mut statuses: Vec<Option<DeliveryStatus>> = vec![None; self.notifiers.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, status)) => statuses[index] = Some(status),
                Err(e) => {
                    if let Some(&index) = spawned.get(&e.id()) {
                        let error = NotifyError::Aborted(e.to_string());
                        statuses[index] = Some(DeliveryStatus::Failed(error.to_string()));
                    }
                }
            }
        }

        self.notifiers
            .iter()
            .zip(statuses)
            .map(|(notifier, status)| {
                let status = status.unwrap_or_else(|| {
                    DeliveryStatus::Failed(NotifyError::Aborted("lost".into()).to_string())
                });
                match &status {
                    DeliveryStatus::Delivered => {
                        tracing::debug!(notifier = notifier.name(), "notification delivered")
                    }
                    DeliveryStatus::Failed(error) => {
                        tracing::warn!(notifier = notifier.name(), %error, "notification failed")
                    }
                    DeliveryStatus::TimedOut => tracing::warn!(
                        notifier = notifier.name(),
                        timeout = ?self.timeout,
                        "notification timed out"
                    ),
                }
                Delivery {
                    notifier: notifier.name().to_string(),
                    status,
                }
            })
            .collect()
    }
}

async fn deliver(notifier: &dyn Notifier, message: &Message, timeout: Duration) -> DeliveryStatus {
    match tokio::time::timeout(timeout, notifier.notify(message)).await {
        Ok(Ok(())) => DeliveryStatus::Delivered,
        Ok(Err(e)) => DeliveryStatus::Failed(e.to_string()),
        Err(_) => DeliveryStatus::TimedOut,
    }
}
