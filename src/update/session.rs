// ABOUTME: Session results: per-container outcomes and the overall status.
// ABOUTME: Built by the coordinator, read by the API, notifiers and the CLI.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::error::GraphError;
use crate::types::{ContainerName, Digest, ImageRef};

/// What started a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Schedule,
    Api,
    Signal,
    Manual,
    Startup,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Schedule => "schedule",
            Trigger::Api => "api",
            Trigger::Signal => "signal",
            Trigger::Manual => "manual",
            Trigger::Startup => "startup",
        };
        f.write_str(name)
    }
}

/// Why a container was left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    OptedOut,
    NotEnabled,
    NotRunning,
    Filtered,
    /// Stale, but only reported.
    MonitorOnly { latest: Digest },
    /// Restored on its old image because a dependency failed to update.
    DependencyFailed { dependency: ContainerName },
    /// Restored because another container in its component could not be stopped.
    ComponentAborted { container: ContainerName },
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OptedOut => write!(f, "opted out"),
            SkipReason::NotEnabled => write!(f, "not enabled"),
            SkipReason::NotRunning => write!(f, "not running"),
            SkipReason::Filtered => write!(f, "not in the container list"),
            SkipReason::MonitorOnly { latest } => {
                write!(f, "monitor only, {} available", latest.short())
            }
            SkipReason::DependencyFailed { dependency } => {
                write!(f, "dependency {dependency} failed to update")
            }
            SkipReason::ComponentAborted { container } => {
                write!(f, "{container} could not be stopped")
            }
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Where a replacement was when it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceState {
    Pending,
    Stopping,
    Stopped,
    Renaming,
    Creating,
    Starting,
    Verifying,
    Completed,
    RolledBack,
    FailedTerminal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContainerOutcome {
    UpToDate,
    Skipped {
        #[serde(flatten)]
        reason: SkipReason,
    },
    Updated {
        from: Option<Digest>,
        to: Option<Digest>,
        /// Recreated on its current image because a dependency changed.
        forced: bool,
    },
    Failed {
        error: String,
        /// `None` when the failure happened before any replacement step.
        state: Option<ReplaceState>,
        rolled_back: bool,
    },
}

impl ContainerOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ContainerOutcome::Failed { .. })
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        ContainerOutcome::Failed {
            error: error.to_string(),
            state: None,
            rolled_back: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerReport {
    pub name: ContainerName,
    pub image: ImageRef,
    #[serde(flatten)]
    pub outcome: ContainerOutcome,
}

/// A connected component that was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentFailure {
    pub containers: Vec<ContainerName>,
    pub error: String,
    #[serde(skip)]
    pub cause: Option<GraphError>,
}

impl ComponentFailure {
    pub fn new(containers: Vec<ContainerName>, cause: GraphError) -> Self {
        Self {
            containers,
            error: cause.to_string(),
            cause: Some(cause),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Succeeded,
    PartiallyFailed,
    Failed { reason: String },
    Cancelled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Succeeded => write!(f, "succeeded"),
            SessionStatus::PartiallyFailed => write!(f, "partially failed"),
            SessionStatus::Failed { reason } => write!(f, "failed: {reason}"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub scanned: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub up_to_date: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub id: u64,
    pub provider: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub containers: Vec<ContainerReport>,
    pub component_failures: Vec<ComponentFailure>,
    pub counts: SessionCounts,
    #[serde(flatten)]
    pub status: SessionStatus,
}

impl SessionResult {
    pub fn report(&self, name: &str) -> Option<&ContainerReport> {
        self.containers.iter().find(|r| r.name.as_str() == name)
    }

    pub fn updated(&self) -> impl Iterator<Item = &ContainerReport> {
        self.containers
            .iter()
            .filter(|r| matches!(r.outcome, ContainerOutcome::Updated { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &ContainerReport> {
        self.containers.iter().filter(|r| r.outcome.is_failed())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ContainerReport> {
        self.containers
            .iter()
            .filter(|r| matches!(r.outcome, ContainerOutcome::Skipped { .. }))
    }

    /// Nothing changed, nothing went wrong and no monitor-only container is
    /// behind its image.
    pub fn is_quiet(&self) -> bool {
        self.counts.updated == 0
            && self.counts.failed == 0
            && self.component_failures.is_empty()
            && self.status == SessionStatus::Succeeded
            && self.monitored().next().is_none()
    }

    /// Stale containers that were only reported.
    pub fn monitored(&self) -> impl Iterator<Item = &ContainerReport> {
        self.containers.iter().filter(|r| {
            matches!(
                r.outcome,
                ContainerOutcome::Skipped {
                    reason: SkipReason::MonitorOnly { .. }
                }
            )
        })
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Failed { .. } | SessionStatus::PartiallyFailed
        )
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Accumulates outcomes while a session runs. Later outcomes for the same
/// container replace earlier ones.
#[derive(Debug)]
pub(crate) struct SessionBuilder {
    id: u64,
    provider: String,
    trigger: Trigger,
    started_at: DateTime<Utc>,
    scanned: usize,
    reports: BTreeMap<ContainerName, ContainerReport>,
    component_failures: Vec<ComponentFailure>,
    cancelled: bool,
}

impl SessionBuilder {
    pub(crate) fn new(id: u64, provider: &str, trigger: Trigger) -> Self {
        Self {
            id,
            provider: provider.to_string(),
            trigger,
            started_at: Utc::now(),
            scanned: 0,
            reports: BTreeMap::new(),
            component_failures: Vec::new(),
            cancelled: false,
        }
    }

    pub(crate) fn scanned(&mut self, count: usize) {
        self.scanned = count;
    }

    pub(crate) fn record(
        &mut self,
        name: ContainerName,
        image: ImageRef,
        outcome: ContainerOutcome,
    ) {
        if matches!(
            outcome,
            ContainerOutcome::Skipped {
                reason: SkipReason::Cancelled
            }
        ) {
            self.cancelled = true;
        }
        self.reports.insert(
            name.clone(),
            ContainerReport {
                name,
                image,
                outcome,
            },
        );
    }

    pub(crate) fn component_failed(&mut self, failure: ComponentFailure) {
        self.component_failures.push(failure);
    }

    pub(crate) fn finish(self, fatal: Option<String>) -> SessionResult {
        let containers: Vec<ContainerReport> = self.reports.into_values().collect();
        let mut counts = SessionCounts {
            scanned: self.scanned,
            ..Default::default()
        };
        for report in &containers {
            match report.outcome {
                ContainerOutcome::UpToDate => counts.up_to_date += 1,
                ContainerOutcome::Skipped { .. } => counts.skipped += 1,
                ContainerOutcome::Updated { .. } => counts.updated += 1,
                ContainerOutcome::Failed { .. } => counts.failed += 1,
            }
        }

        let status = if let Some(reason) = fatal {
            SessionStatus::Failed { reason }
        } else if self.cancelled {
            SessionStatus::Cancelled
        } else if counts.failed > 0 || !self.component_failures.is_empty() {
            SessionStatus::PartiallyFailed
        } else {
            SessionStatus::Succeeded
        };

        SessionResult {
            id: self.id,
            provider: self.provider,
            trigger: self.trigger,
            started_at: self.started_at,
            finished_at: Utc::now(),
            containers,
            component_failures: self.component_failures,
            counts,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> ContainerName {
        ContainerName::new(value).unwrap()
    }

    fn image() -> ImageRef {
        ImageRef::parse("nginx:1").unwrap()
    }

    #[test]
    fn later_outcome_replaces_earlier() {
        let mut builder = SessionBuilder::new(1, "local", Trigger::Manual);
        builder.record(name("web"), image(), ContainerOutcome::UpToDate);
        builder.record(
            name("web"),
            image(),
            ContainerOutcome::Updated {
                from: None,
                to: None,
                forced: true,
            },
        );
        let result = builder.finish(None);
        assert_eq!(result.containers.len(), 1);
        assert_eq!(result.counts.updated, 1);
        assert_eq!(result.status, SessionStatus::Succeeded);
    }

    #[test]
    fn failures_make_session_partial() {
        let mut builder = SessionBuilder::new(2, "local", Trigger::Api);
        builder.record(name("db"), image(), ContainerOutcome::failed("pull failed"));
        let result = builder.finish(None);
        assert_eq!(result.status, SessionStatus::PartiallyFailed);
        assert!(result.is_failure());
        assert!(!result.is_quiet());
    }

    #[test]
    fn fatal_reason_wins() {
        let builder = SessionBuilder::new(3, "local", Trigger::Schedule);
        let result = builder.finish(Some("runtime unreachable".into()));
        assert!(matches!(result.status, SessionStatus::Failed { .. }));
    }

    #[test]
    fn serializes_flat_outcomes() {
        let mut builder = SessionBuilder::new(4, "local", Trigger::Api);
        builder.record(
            name("cache"),
            image(),
            ContainerOutcome::Skipped {
                reason: SkipReason::OptedOut,
            },
        );
        let json = serde_json::to_value(builder.finish(None)).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["trigger"], "api");
        assert_eq!(json["containers"][0]["outcome"], "skipped");
        assert_eq!(json["containers"][0]["reason"], "opted_out");
    }
}
