// ABOUTME: Update session coordinator: lock, scan, classify, plan, execute, report.
// ABOUTME: One per provider; every trigger source goes through run_once.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::comparator::{Staleness, classify, latest_digest};
use super::error::CoordinatorError;
use super::execute::run_component;
use super::graph::DependencyGraph;
use super::lock::ScanLock;
use super::plan::{ComponentPlan, UpdatePlan};
use super::policy::{OptOutPrecedence, UpdatePolicy};
use super::replace::ReplaceContext;
use super::session::{ContainerOutcome, SessionBuilder, SessionResult, SkipReason, Trigger};
use crate::runtime::FullRuntime;
use crate::runtime::traits::{ContainerFilters, ContainerRecord, ImageError};
use crate::types::{ContainerName, Digest};

pub struct Coordinator {
    provider: String,
    runtime: Arc<dyn FullRuntime>,
    policy: UpdatePolicy,
    lock: ScanLock,
    cancel: CancellationToken,
    sequence: AtomicU64,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("provider", &self.provider)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Coordinator {
    /// The policy is fixed for the coordinator's lifetime. `cancel` stops
    /// new work at container boundaries.
    pub fn new(
        provider: impl Into<String>,
        runtime: Arc<dyn FullRuntime>,
        policy: UpdatePolicy,
        lock: ScanLock,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider: provider.into(),
            runtime,
            policy,
            lock,
            cancel,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn policy(&self) -> &UpdatePolicy {
        &self.policy
    }

    pub fn lock(&self) -> &ScanLock {
        &self.lock
    }

    /// Run one scan-plan-execute pass.
    ///
    /// With `blocking` false a busy lock returns `LockBusy` at once and
    /// nothing touches the runtime. Runtime failures never come back as
    /// `Err`: they are in the returned session's status.
    pub async fn run_once(
        &self,
        trigger: Trigger,
        blocking: bool,
    ) -> Result<SessionResult, CoordinatorError> {
        let _guard = if blocking {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CoordinatorError::Cancelled),
                guard = self.lock.acquire(trigger) => guard,
            }
        } else {
            self.lock.try_acquire(trigger)?
        };

        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let span = tracing::info_span!("session", provider = %self.provider, id, %trigger);
        let result = self.session(id, trigger).instrument(span).await;
        tracing::info!(
            provider = %self.provider,
            id,
            status = %result.status,
            updated = result.counts.updated,
            failed = result.counts.failed,
            "session finished"
        );
        Ok(result)
    }

    async fn session(&self, id: u64, trigger: Trigger) -> SessionResult {
        let mut session = SessionBuilder::new(id, &self.provider, trigger);
        let timeouts = &self.policy.timeouts;

        let listed = tokio::time::timeout(
            timeouts.operation,
            self.runtime.list_containers(&ContainerFilters::all()),
        )
        .await;
        let records = match listed {
            Ok(Ok(records)) => records,
            Ok(Err(error)) => {
                tracing::error!(%error, "cannot list containers");
                return session.finish(Some(error.to_string()));
            }
            Err(_) => {
                tracing::error!("listing containers timed out");
                return session.finish(Some(format!(
                    "listing containers timed out after {:?}",
                    timeouts.operation
                )));
            }
        };
        session.scanned(records.len());

        let classified = self.classify_all(&records).await;
        let mut stale: BTreeMap<ContainerName, Digest> = BTreeMap::new();
        let mut unknown: BTreeSet<ContainerName> = BTreeSet::new();
        let mut opted_out: BTreeMap<ContainerName, Option<Digest>> = BTreeMap::new();
        for (record, staleness) in records.iter().zip(classified) {
            let outcome = match staleness {
                Ok(Staleness::Current) => ContainerOutcome::UpToDate,
                Ok(Staleness::Skip(reason)) => {
                    match &reason {
                        SkipReason::OptedOut | SkipReason::NotEnabled | SkipReason::Filtered => {
                            opted_out.insert(record.name.clone(), None);
                        }
                        SkipReason::MonitorOnly { latest } => {
                            opted_out.insert(record.name.clone(), Some(latest.clone()));
                        }
                        _ => {}
                    }
                    ContainerOutcome::Skipped { reason }
                }
                Ok(Staleness::Stale { latest }) => {
                    stale.insert(record.name.clone(), latest);
                    continue;
                }
                Err(error) => {
                    tracing::warn!(container = %record.name, %error, "cannot resolve latest image");
                    unknown.insert(record.name.clone());
                    ContainerOutcome::failed(error)
                }
            };
            session.record(record.name.clone(), record.image.clone(), outcome);
        }

        let held = if self.policy.opt_out_precedence == OptOutPrecedence::FavorForce {
            self.held_dependencies(&records, &stale, &opted_out).await
        } else {
            BTreeMap::new()
        };
        let plan = UpdatePlan::build_with_held(&records, &stale, &held, &unknown, &self.policy);
        tracing::info!(
            scanned = records.len(),
            stale = stale.len(),
            planned = plan.len(),
            aborted = plan.aborted.len(),
            "planned"
        );

        let by_name: BTreeMap<&ContainerName, &ContainerRecord> =
            records.iter().map(|r| (&r.name, r)).collect();
        for failure in plan.aborted {
            for name in &failure.containers {
                if let Some(record) = by_name.get(name) {
                    session.record(
                        name.clone(),
                        record.image.clone(),
                        ContainerOutcome::failed(&failure.error),
                    );
                }
            }
            session.component_failed(failure);
        }

        let ctx = ReplaceContext {
            runtime: self.runtime.as_ref(),
            timeouts,
            cleanup: self.policy.cleanup,
        };
        let runs: Vec<BoxFuture<'_, BTreeMap<ContainerName, ContainerOutcome>>> = plan
            .components
            .iter()
            .map(|component| self.run_unless_cancelled(ctx, component).boxed())
            .collect();
        let results: Vec<_> = stream::iter(runs)
            .buffer_unordered(self.policy.worker_limit.max(1))
            .collect()
            .await;

        for outcomes in results {
            for (name, outcome) in outcomes {
                if let Some(record) = by_name.get(&name) {
                    session.record(name, record.image.clone(), outcome);
                }
            }
        }

        session.finish(None)
    }

    async fn run_unless_cancelled(
        &self,
        ctx: ReplaceContext<'_>,
        component: &ComponentPlan,
    ) -> BTreeMap<ContainerName, ContainerOutcome> {
        if self.cancel.is_cancelled() {
            return component
                .names()
                .map(|name| {
                    (
                        name.clone(),
                        ContainerOutcome::Skipped {
                            reason: SkipReason::Cancelled,
                        },
                    )
                })
                .collect();
        }
        run_component(ctx, component).await
    }

    /// Classify every record in snapshot order, at most `worker_limit`
    /// registry lookups at a time.
    async fn classify_all(
        &self,
        records: &[ContainerRecord],
    ) -> Vec<Result<Staleness, ImageError>> {
        let lookups: Vec<BoxFuture<'_, Result<Staleness, ImageError>>> = records
            .iter()
            .map(|record| self.classify_one(record).boxed())
            .collect();
        stream::iter(lookups)
            .buffered(self.policy.worker_limit.max(1))
            .collect()
            .await
    }

    async fn classify_one(&self, record: &ContainerRecord) -> Result<Staleness, ImageError> {
        if self.cancel.is_cancelled() {
            return Ok(Staleness::Skip(SkipReason::Cancelled));
        }
        classify(self.runtime.as_ref(), &self.policy, record).await
    }

    /// Opted-out containers that stale containers depend on, directly or
    /// through other opted-out containers, and whose own image is stale.
    /// Each maps to its latest digest and the container that needs it.
    async fn held_dependencies(
        &self,
        records: &[ContainerRecord],
        stale: &BTreeMap<ContainerName, Digest>,
        opted_out: &BTreeMap<ContainerName, Option<Digest>>,
    ) -> BTreeMap<ContainerName, (Digest, ContainerName)> {
        let mut held = BTreeMap::new();
        if stale.is_empty() || opted_out.is_empty() {
            return held;
        }
        let graph = DependencyGraph::from_records(records);
        let by_name: BTreeMap<&ContainerName, &ContainerRecord> =
            records.iter().map(|r| (&r.name, r)).collect();

        let mut seen: BTreeSet<ContainerName> = stale.keys().cloned().collect();
        let mut queue: VecDeque<ContainerName> = stale.keys().cloned().collect();
        while let Some(dependent) = queue.pop_front() {
            let dependencies: Vec<ContainerName> =
                graph.dependencies(&dependent).cloned().collect();
            for name in dependencies {
                if !seen.insert(name.clone()) {
                    continue;
                }
                let (Some(known), Some(record)) = (opted_out.get(&name), by_name.get(&name)) else {
                    continue;
                };
                if self.cancel.is_cancelled() {
                    return held;
                }
                let resolved = match known {
                    Some(latest) => Ok(Some(latest.clone())),
                    None => latest_digest(self.runtime.as_ref(), &self.policy, record).await,
                };
                let latest = match resolved {
                    Ok(Some(latest)) => latest,
                    Ok(None) => continue,
                    Err(error) => {
                        tracing::warn!(container = %name, %error, "cannot resolve dependency");
                        continue;
                    }
                };
                if record.digest.as_ref() == Some(&latest) {
                    continue;
                }
                tracing::info!(container = %name, %dependent, "replacing opted-out dependency");
                held.insert(name.clone(), (latest, dependent.clone()));
                queue.push_back(name);
            }
        }
        held
    }
}
