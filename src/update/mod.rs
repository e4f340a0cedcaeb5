// ABOUTME: Update orchestration: comparator, dependency graph, plan, replacement and coordinator.
// ABOUTME: The coordinator is the only entry point trigger sources use.

mod comparator;
mod coordinator;
mod error;
mod execute;
mod graph;
mod lock;
mod plan;
mod policy;
mod replace;
mod session;

pub use comparator::{Staleness, classify, compare, eligibility, latest_digest};
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, CoordinatorErrorKind, GraphError, ReplaceError, Step};
pub use graph::{DependencyGraph, Order};
pub use lock::{LockHolder, ScanGuard, ScanLock};
pub use plan::{ComponentPlan, PlanReason, PlannedContainer, UpdatePlan};
pub use policy::{
    DEPENDS_ON_LABEL, ENABLE_LABEL, MONITOR_ONLY_LABEL, OptOutPrecedence, Timeouts, UpdatePolicy,
    declared_dependencies,
};
pub use replace::{ReplaceContext, Replacement, TransitionResult};
pub use session::{
    ComponentFailure, ContainerOutcome, ContainerReport, ReplaceState, SessionCounts,
    SessionResult, SessionStatus, SkipReason, Trigger,
};
