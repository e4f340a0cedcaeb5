// ABOUTME: Long-running agent: one coordinator per provider plus notification fanout.
// ABOUTME: Owns the scheduler, signal triggers, the last-session store and shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::notify::{self, Fanout};
use crate::runtime;
use crate::update::{Coordinator, CoordinatorError, ScanLock, SessionResult, Trigger};

// ============================================================================
// Last sessions
// ============================================================================

/// Latest finished session per provider. Nothing else is kept.
#[derive(Debug, Clone, Default)]
pub struct LastSessions {
    inner: Arc<RwLock<BTreeMap<String, SessionResult>>>,
}

impl LastSessions {
    pub fn record(&self, result: SessionResult) {
        self.inner.write().insert(result.provider.clone(), result);
    }

    pub fn get(&self, provider: &str) -> Option<SessionResult> {
        self.inner.read().get(provider).cloned()
    }

    /// All stored results, ordered by provider id.
    pub fn all(&self) -> Vec<SessionResult> {
        self.inner.read().values().cloned().collect()
    }
}

// ============================================================================
// Agent
// ============================================================================

struct Inner {
    coordinators: Vec<Arc<Coordinator>>,
    fanout: Fanout,
    sessions: LastSessions,
    cancel: CancellationToken,
    in_flight: Mutex<JoinSet<()>>,
}

/// Cheap to clone; clones share coordinators, locks and state.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("providers", &self.providers())
            .field("fanout", &self.inner.fanout)
            .finish()
    }
}

impl Agent {
    pub fn new(coordinators: Vec<Coordinator>, fanout: Fanout, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                coordinators: coordinators.into_iter().map(Arc::new).collect(),
                fanout,
                sessions: LastSessions::default(),
                cancel,
                in_flight: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Connect every configured provider and build the notifiers.
    ///
    /// # Errors
    ///
    /// Fails on the first provider that cannot be reached or on a
    /// notification channel whose settings cannot be resolved.
    pub async fn connect(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let mut coordinators = Vec::with_capacity(config.providers.len());
        for provider in config.providers.iter() {
            let runtime = runtime::connect(provider)
                .await
                .map_err(|source| Error::Provider {
                    provider: provider.id.clone(),
                    source,
                })?;
            tracing::info!(provider = %provider.id, mode = ?provider.mode(), "provider connected");
            coordinators.push(Coordinator::new(
                provider.id.clone(),
                runtime,
                config.update.policy(provider),
                ScanLock::new(),
                cancel.clone(),
            ));
        }
        let fanout = notify::from_config(&config.notifications)?;
        Ok(Self::new(coordinators, fanout, cancel))
    }

    pub fn providers(&self) -> Vec<&str> {
        self.inner.coordinators.iter().map(|c| c.provider()).collect()
    }

    pub fn sessions(&self) -> &LastSessions {
        &self.inner.sessions
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Any provider currently inside a session.
    pub fn is_busy(&self) -> bool {
        self.inner.coordinators.iter().any(|c| c.lock().is_held())
    }

    /// Run one session on every provider and notify for each.
    ///
    /// Providers run concurrently. With `blocking` false a provider that is
    /// already scanning is left alone and has no entry in the result.
    pub async fn run_all(&self, trigger: Trigger, blocking: bool) -> Vec<SessionResult> {
        let runs = self.inner.coordinators.iter().cloned().map(|coordinator| async move {
            match coordinator.run_once(trigger, blocking).await {
                Ok(result) => Some(result),
                Err(CoordinatorError::LockBusy { holder }) => {
                    tracing::info!(
                        provider = coordinator.provider(),
                        %trigger,
                        holder = %holder.map(|h| h.to_string()).unwrap_or_default(),
                        "scan already running, trigger ignored"
                    );
                    None
                }
                Err(CoordinatorError::Cancelled) => None,
            }
        });
        let results: Vec<SessionResult> = join_all(runs).await.into_iter().flatten().collect();

        for result in &results {
            self.inner.sessions.record(result.clone());
            self.inner.fanout.dispatch(result).await;
        }
        results
    }

    /// Start a non-blocking run in the background and return at once.
    pub fn trigger(&self, trigger: Trigger) {
        if self.inner.cancel.is_cancelled() {
            tracing::debug!(%trigger, "shutting down, trigger ignored");
            return;
        }
        let agent = self.clone();
        let mut in_flight = self.inner.in_flight.lock();
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            agent.run_all(trigger, false).await;
        });
    }

    /// Run on a fixed interval until cancelled.
    pub async fn schedule(&self, interval: Duration, run_on_start: bool) {
        if run_on_start {
            self.run_all(Trigger::Startup, false).await;
        }

        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval = ?interval, "scheduler started");

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_all(Trigger::Schedule, false).await;
                }
            }
        }
        tracing::debug!("scheduler stopped");
    }

    /// Wait for background runs started by `trigger` to finish.
    pub async fn drain(&self) {
        let mut pending = std::mem::take(&mut *self.inner.in_flight.lock());
        while pending.join_next().await.is_some() {}
    }
}

// ============================================================================
// Signals
// ============================================================================

/// SIGUSR1 and SIGHUP start a run; SIGINT and SIGTERM cancel the agent.
#[cfg(unix)]
pub async fn watch_signals(agent: Agent) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let cancel = agent.cancel_token().clone();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = usr1.recv() => agent.trigger(Trigger::Signal),
            _ = hup.recv() => agent.trigger(Trigger::Signal),
            _ = term.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                cancel.cancel();
                break;
            }
            _ = int.recv() => {
                tracing::info!("SIGINT received, shutting down");
                cancel.cancel();
                break;
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn watch_signals(agent: Agent) -> std::io::Result<()> {
    let cancel = agent.cancel_token().clone();
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            cancel.cancel();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryRuntime;
    use crate::runtime::memory::ContainerFixture;
    use crate::update::{SessionStatus, UpdatePolicy};

    const DIGEST: &str =
        "sha256:1111111111111111111111111111111111111111111111111111111111111111";

    fn agent_with(runtime: MemoryRuntime) -> Agent {
        let coordinator = Coordinator::new(
            "local",
            Arc::new(runtime),
            UpdatePolicy::default(),
            ScanLock::new(),
            CancellationToken::new(),
        );
        Agent::new(vec![coordinator], Fanout::default(), CancellationToken::new())
    }

    #[tokio::test]
    async fn run_all_stores_last_session() {
        let runtime = MemoryRuntime::new();
        runtime.publish("nginx:1.25", DIGEST);
        runtime.add(ContainerFixture::new("web", "nginx:1.25")).unwrap();
        let agent = agent_with(runtime);

        let results = agent.run_all(Trigger::Manual, true).await;
        assert_eq!(results.len(), 1);
        let stored = agent.sessions().get("local").unwrap();
        assert_eq!(stored.status, SessionStatus::Succeeded);
        assert_eq!(stored.trigger, Trigger::Manual);
    }

    #[tokio::test]
    async fn trigger_runs_in_background() {
        let runtime = MemoryRuntime::new();
        runtime.publish("nginx:1.25", DIGEST);
        runtime.add(ContainerFixture::new("web", "nginx:1.25")).unwrap();
        let agent = agent_with(runtime);

        agent.trigger(Trigger::Api);
        agent.drain().await;
        assert_eq!(agent.sessions().all().len(), 1);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn session_futures_can_be_spawned() {
        let agent = agent_with(MemoryRuntime::new());
        assert_send(&agent.run_all(Trigger::Api, false));
        let coordinator = Coordinator::new(
            "local",
            Arc::new(MemoryRuntime::new()),
            UpdatePolicy::default(),
            ScanLock::new(),
            CancellationToken::new(),
        );
        assert_send(&coordinator.run_once(Trigger::Api, false));
    }

    #[tokio::test]
    async fn cancelled_agent_ignores_triggers() {
        let agent = agent_with(MemoryRuntime::new());
        agent.cancel_token().cancel();
        agent.trigger(Trigger::Signal);
        agent.drain().await;
        assert!(agent.sessions().all().is_empty());
    }
}
