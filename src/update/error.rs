// ABOUTME: Error types for update sessions.
// ABOUTME: Replacement steps, dependency graph problems and lock contention.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::lock::LockHolder;
use crate::runtime::traits::{ContainerError, ContainerStatus};
use crate::types::ContainerName;

/// One runtime call made by a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Inspect,
    Stop,
    Rename,
    Create,
    Start,
    Verify,
    Remove,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Inspect => "inspect",
            Step::Stop => "stop",
            Step::Rename => "rename",
            Step::Create => "create",
            Step::Start => "start",
            Step::Verify => "verify",
            Step::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Errors from the container replacement state machine.
#[derive(Debug, thiserror::Error)]
pub enum ReplaceError {
    #[error("{step} failed for {container}: {source}")]
    Runtime {
        container: ContainerName,
        step: Step,
        #[source]
        source: ContainerError,
    },

    #[error("{step} timed out for {container} after {timeout:?}")]
    Timeout {
        container: ContainerName,
        step: Step,
        timeout: Duration,
    },

    #[error("{container} is not live after start (state {:?})", .status.state)]
    NotLive {
        container: ContainerName,
        status: ContainerStatus,
    },

    #[error("{cause}; rollback failed: {rollback}")]
    RollbackFailed {
        cause: Box<ReplaceError>,
        rollback: Box<ReplaceError>,
    },
}

impl ReplaceError {
    pub fn step(&self) -> Step {
        match self {
            ReplaceError::Runtime { step, .. } | ReplaceError::Timeout { step, .. } => *step,
            ReplaceError::NotLive { .. } => Step::Verify,
            ReplaceError::RollbackFailed { cause, .. } => cause.step(),
        }
    }
}

/// Structural problems that abort a whole connected component.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("cyclic dependency between {}", join(containers))]
    CyclicDependency { containers: Vec<ContainerName> },

    #[error("malformed lookout.depends-on label on {container}: {value:?}")]
    MalformedDependency {
        container: ContainerName,
        value: String,
    },
}

fn join(names: &[ContainerName]) -> String {
    names
        .iter()
        .map(ContainerName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Why `run_once` did not produce a session.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("an update session is already running{}", holder_suffix(.holder))]
    LockBusy { holder: Option<LockHolder> },

    #[error("shutdown requested while waiting for the scan lock")]
    Cancelled,
}

fn holder_suffix(holder: &Option<LockHolder>) -> String {
    holder
        .as_ref()
        .map(|h| format!(" ({h})"))
        .unwrap_or_default()
}

/// Kind of coordinator error, for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorErrorKind {
    LockBusy,
    Cancelled,
}

impl CoordinatorError {
    pub fn kind(&self) -> CoordinatorErrorKind {
        match self {
            CoordinatorError::LockBusy { .. } => CoordinatorErrorKind::LockBusy,
            CoordinatorError::Cancelled => CoordinatorErrorKind::Cancelled,
        }
    }

    pub fn is_lock_busy(&self) -> bool {
        self.kind() == CoordinatorErrorKind::LockBusy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> ContainerName {
        ContainerName::new(value).unwrap()
    }

    #[test]
    fn cycle_message_names_members() {
        let err = GraphError::CyclicDependency {
            containers: vec![name("a"), name("b")],
        };
        assert_eq!(err.to_string(), "cyclic dependency between a, b");
    }

    #[test]
    fn rollback_failure_reports_original_step() {
        let err = ReplaceError::RollbackFailed {
            cause: Box::new(ReplaceError::Timeout {
                container: name("web"),
                step: Step::Start,
                timeout: Duration::from_secs(1),
            }),
            rollback: Box::new(ReplaceError::Runtime {
                container: name("web"),
                step: Step::Rename,
                source: ContainerError::Runtime("boom".into()),
            }),
        };
        assert_eq!(err.step(), Step::Start);
        assert!(err.to_string().contains("rollback failed"));
    }

    #[test]
    fn lock_busy_kind() {
        let err = CoordinatorError::LockBusy { holder: None };
        assert!(err.is_lock_busy());
        assert_eq!(err.to_string(), "an update session is already running");
    }
}
