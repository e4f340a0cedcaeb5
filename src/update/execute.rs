// ABOUTME: Runs one connected component of the plan: stop phase, then start phase.
// ABOUTME: A failed container holds back its dependents; a failed stop aborts the component.

use std::collections::{BTreeMap, BTreeSet};

use super::plan::ComponentPlan;
use super::replace::{self, Parked, ReplaceContext, Replacement, rolled_back_outcome};
use super::session::{ContainerOutcome, ReplaceState, SkipReason};
use crate::types::ContainerName;

/// Replace every member of `component` and report each one's outcome.
pub(crate) async fn run_component(
    ctx: ReplaceContext<'_>,
    component: &ComponentPlan,
) -> BTreeMap<ContainerName, ContainerOutcome> {
    let mut outcomes = BTreeMap::new();
    let mut parked: BTreeMap<ContainerName, Replacement<Parked>> = BTreeMap::new();
    let mut failed: BTreeSet<ContainerName> = BTreeSet::new();

    // Stop phase: dependents first.
    for (position, name) in component.order.stop.iter().enumerate() {
        let Some(planned) = component.members.get(name) else {
            continue;
        };
        let pending = match Replacement::prepare(ctx, planned).await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::warn!(container = %name, %error, "cannot prepare replacement");
                outcomes.insert(
                    name.clone(),
                    ContainerOutcome::Failed {
                        error: error.to_string(),
                        state: Some(ReplaceState::Pending),
                        rolled_back: false,
                    },
                );
                failed.insert(name.clone());
                continue;
            }
        };

        let stopped = match pending.stop(ctx).await {
            Ok(stopped) => stopped,
            Err((_, error)) => {
                tracing::error!(container = %name, %error, "stop failed, aborting component");
                outcomes.insert(
                    name.clone(),
                    ContainerOutcome::Failed {
                        error: error.to_string(),
                        state: Some(ReplaceState::FailedTerminal),
                        rolled_back: false,
                    },
                );
                for untouched in &component.order.stop[position + 1..] {
                    outcomes.insert(
                        untouched.clone(),
                        ContainerOutcome::Skipped {
                            reason: SkipReason::ComponentAborted {
                                container: name.clone(),
                            },
                        },
                    );
                }
                abort(ctx, component, name, parked, &mut outcomes).await;
                return outcomes;
            }
        };

        match stopped.park(ctx).await {
            Ok(replacement) => {
                parked.insert(name.clone(), replacement);
            }
            Err((stopped, error)) => {
                let rollback = stopped.restore(ctx).await;
                outcomes.insert(
                    name.clone(),
                    rolled_back_outcome(name, error, ReplaceState::Renaming, rollback),
                );
                failed.insert(name.clone());
            }
        }
    }

    // Start phase: dependencies first.
    for name in &component.order.start {
        let Some(replacement) = parked.remove(name) else {
            continue;
        };
        let failed_dependency = component
            .dependencies_of(name)
            .find(|d| failed.contains(*d))
            .cloned();
        let outcome = match failed_dependency {
            Some(dependency) => {
                tracing::warn!(container = %name, %dependency, "dependency failed, restoring");
                restore_outcome(
                    name,
                    replacement.restore(ctx).await,
                    SkipReason::DependencyFailed { dependency },
                )
            }
            None => replace::complete(ctx, replacement).await,
        };
        if !matches!(outcome, ContainerOutcome::Updated { .. }) {
            failed.insert(name.clone());
        }
        outcomes.insert(name.clone(), outcome);
    }

    outcomes
}

/// Restore everything already parked, dependencies first.
async fn abort(
    ctx: ReplaceContext<'_>,
    component: &ComponentPlan,
    culprit: &ContainerName,
    mut parked: BTreeMap<ContainerName, Replacement<Parked>>,
    outcomes: &mut BTreeMap<ContainerName, ContainerOutcome>,
) {
    for name in &component.order.start {
        let Some(replacement) = parked.remove(name) else {
            continue;
        };
        let outcome = restore_outcome(
            name,
            replacement.restore(ctx).await,
            SkipReason::ComponentAborted {
                container: culprit.clone(),
            },
        );
        outcomes.insert(name.clone(), outcome);
    }
}

fn restore_outcome<T>(
    name: &ContainerName,
    restored: Result<T, super::error::ReplaceError>,
    reason: SkipReason,
) -> ContainerOutcome {
    match restored {
        Ok(_) => ContainerOutcome::Skipped { reason },
        Err(error) => {
            tracing::error!(container = %name, %error, "could not restore container");
            ContainerOutcome::Failed {
                error: format!("{reason}; restore failed: {error}"),
                state: Some(ReplaceState::FailedTerminal),
                rolled_back: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::memory::{ContainerFixture, Operation};
    use crate::runtime::traits::{ContainerFilters, ContainerOps};
    use crate::runtime::MemoryRuntime;
    use crate::types::Digest;
    use crate::update::plan::UpdatePlan;
    use crate::update::policy::{DEPENDS_ON_LABEL, Timeouts, UpdatePolicy};
    use std::time::Duration;

    async fn single_component(runtime: &MemoryRuntime, stale: &[&str]) -> ComponentPlan {
        let records = runtime
            .list_containers(&ContainerFilters::all())
            .await
            .unwrap();
        let stale = stale
            .iter()
            .map(|n| {
                (
                    ContainerName::new(n).unwrap(),
                    Digest::parse("sha256:bb").unwrap(),
                )
            })
            .collect();
        let mut plan =
            UpdatePlan::build(&records, &stale, &BTreeSet::new(), &UpdatePolicy::default());
        assert_eq!(plan.components.len(), 1);
        plan.components.remove(0)
    }

    fn chain() -> MemoryRuntime {
        let runtime = MemoryRuntime::new();
        runtime.publish("app:1", "sha256:aa");
        runtime.add(ContainerFixture::new("db", "app:1")).unwrap();
        runtime
            .add(ContainerFixture::new("api", "app:1").label(DEPENDS_ON_LABEL, "db"))
            .unwrap();
        runtime
            .add(ContainerFixture::new("web", "app:1").link("api"))
            .unwrap();
        runtime.publish("app:1", "sha256:bb");
        runtime
    }

    fn timeouts() -> Timeouts {
        Timeouts {
            settle: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stop_failure_restores_what_was_parked() {
        let runtime = chain();
        let component = single_component(&runtime, &["db", "api", "web"]).await;
        runtime.fail(Operation::Stop, "api");
        let timeouts = timeouts();
        let ctx = ReplaceContext {
            runtime: &runtime,
            timeouts: &timeouts,
            cleanup: false,
        };

        let outcomes = run_component(ctx, &component).await;

        let api = ContainerName::new("api").unwrap();
        assert!(matches!(
            outcomes[&api],
            ContainerOutcome::Failed {
                state: Some(ReplaceState::FailedTerminal),
                ..
            }
        ));
        for name in ["web", "db"] {
            assert_eq!(
                outcomes[&ContainerName::new(name).unwrap()],
                ContainerOutcome::Skipped {
                    reason: SkipReason::ComponentAborted {
                        container: api.clone()
                    }
                }
            );
        }
        assert_eq!(runtime.names(), vec!["api", "db", "web"]);
        assert!(runtime.container("web").unwrap().is_running());
        assert!(runtime.container("db").unwrap().is_running());
    }

    #[tokio::test]
    async fn dependency_failure_cascades_down_the_chain() {
        let runtime = chain();
        let component = single_component(&runtime, &["db", "api", "web"]).await;
        runtime.fail_once(Operation::Start, "db");
        let timeouts = timeouts();
        let ctx = ReplaceContext {
            runtime: &runtime,
            timeouts: &timeouts,
            cleanup: false,
        };

        let outcomes = run_component(ctx, &component).await;

        let db = ContainerName::new("db").unwrap();
        let api = ContainerName::new("api").unwrap();
        assert!(outcomes[&db].is_failed());
        assert_eq!(
            outcomes[&api],
            ContainerOutcome::Skipped {
                reason: SkipReason::DependencyFailed { dependency: db }
            }
        );
        assert_eq!(
            outcomes[&ContainerName::new("web").unwrap()],
            ContainerOutcome::Skipped {
                reason: SkipReason::DependencyFailed { dependency: api }
            }
        );
        for name in ["db", "api", "web"] {
            let record = runtime.container(name).unwrap();
            assert_eq!(record.digest.as_ref().unwrap().as_str(), "sha256:aa");
            assert!(record.is_running());
        }
    }
}
