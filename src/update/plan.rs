// ABOUTME: Update plan: which containers get replaced, why, and in what order.
// ABOUTME: Groups the replacement set into connected components and isolates broken ones.

use std::collections::{BTreeMap, BTreeSet};

use super::comparator::resists_cascade;
use super::graph::{DependencyGraph, Order};
use super::policy::{OptOutPrecedence, UpdatePolicy};
use super::session::ComponentFailure;
use crate::runtime::traits::ContainerRecord;
use crate::types::{ContainerName, Digest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanReason {
    Stale { latest: Digest },
    /// Recreated on its current reference because `dependency` is replaced.
    Forced { dependency: ContainerName },
    /// Opted out, but stale and needed by `dependent`. Only planned under
    /// `favor-force`.
    Held {
        latest: Digest,
        dependent: ContainerName,
    },
}

impl PlanReason {
    /// The digest being moved to, when the image itself changed.
    pub fn latest(&self) -> Option<&Digest> {
        match self {
            PlanReason::Stale { latest } | PlanReason::Held { latest, .. } => Some(latest),
            PlanReason::Forced { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedContainer {
    pub record: ContainerRecord,
    pub reason: PlanReason,
}

/// One connected component of the replacement set.
#[derive(Debug, Clone)]
pub struct ComponentPlan {
    pub members: BTreeMap<ContainerName, PlannedContainer>,
    pub order: Order,
    /// Dependency edges between members only.
    pub dependencies: BTreeMap<ContainerName, BTreeSet<ContainerName>>,
}

impl ComponentPlan {
    pub fn names(&self) -> impl Iterator<Item = &ContainerName> {
        self.members.keys()
    }

    pub fn dependencies_of(&self, name: &ContainerName) -> impl Iterator<Item = &ContainerName> {
        self.dependencies.get(name).into_iter().flatten()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    pub components: Vec<ComponentPlan>,
    pub aborted: Vec<ComponentFailure>,
}

impl UpdatePlan {
    /// Plan the replacement of `stale`, plus cascaded dependents when the
    /// policy asks for them. `failed` are records whose staleness is unknown.
    pub fn build(
        records: &[ContainerRecord],
        stale: &BTreeMap<ContainerName, Digest>,
        failed: &BTreeSet<ContainerName>,
        policy: &UpdatePolicy,
    ) -> Self {
        Self::build_with_held(records, stale, &BTreeMap::new(), failed, policy)
    }

    /// As [`UpdatePlan::build`], also replacing `held`: opted-out containers
    /// mapped to their latest digest and the planned container that needs them.
    pub fn build_with_held(
        records: &[ContainerRecord],
        stale: &BTreeMap<ContainerName, Digest>,
        held: &BTreeMap<ContainerName, (Digest, ContainerName)>,
        failed: &BTreeSet<ContainerName>,
        policy: &UpdatePolicy,
    ) -> Self {
        let graph = DependencyGraph::from_records(records);
        let by_name: BTreeMap<&ContainerName, &ContainerRecord> =
            records.iter().map(|r| (&r.name, r)).collect();

        let mut reasons: BTreeMap<ContainerName, PlanReason> = stale
            .iter()
            .map(|(name, latest)| {
                (
                    name.clone(),
                    PlanReason::Stale {
                        latest: latest.clone(),
                    },
                )
            })
            .collect();
        if policy.opt_out_precedence == OptOutPrecedence::FavorForce {
            for (name, (latest, dependent)) in held {
                reasons.entry(name.clone()).or_insert_with(|| PlanReason::Held {
                    latest: latest.clone(),
                    dependent: dependent.clone(),
                });
            }
        }

        if policy.restart_dependents {
            let seeds: BTreeSet<ContainerName> = reasons.keys().cloned().collect();
            let forced = graph.dependents_closure(&seeds, |name| {
                let Some(record) = by_name.get(name) else {
                    return false;
                };
                if !record.is_running() || failed.contains(name) {
                    return false;
                }
                if resists_cascade(policy, record) {
                    let admit = policy.opt_out_precedence == OptOutPrecedence::FavorForce;
                    tracing::debug!(
                        container = %name,
                        admit,
                        "dependency cascade reached an opted-out container"
                    );
                    return admit;
                }
                true
            });
            for (name, dependency) in forced {
                reasons.insert(name, PlanReason::Forced { dependency });
            }
        }

        let selected: BTreeSet<ContainerName> = reasons.keys().cloned().collect();
        let mut plan = UpdatePlan::default();
        for component in graph.components(&selected) {
            let members: Vec<ContainerName> = component.iter().cloned().collect();

            if let Some(error) = component.iter().find_map(|n| graph.malformed(n)) {
                tracing::warn!(%error, "skipping component");
                plan.aborted.push(ComponentFailure::new(members, error));
                continue;
            }
            let order = match graph.order(&component) {
                Ok(order) => order,
                Err(error) => {
                    tracing::warn!(%error, "skipping component");
                    plan.aborted.push(ComponentFailure::new(members, error));
                    continue;
                }
            };

            let dependencies = component
                .iter()
                .map(|name| {
                    let within = graph
                        .dependencies(name)
                        .filter(|d| component.contains(*d))
                        .cloned()
                        .collect();
                    (name.clone(), within)
                })
                .collect();
            let members = component
                .iter()
                .filter_map(|name| {
                    let record = by_name.get(name)?;
                    let reason = reasons.get(name)?.clone();
                    Some((
                        name.clone(),
                        PlannedContainer {
                            record: (*record).clone(),
                            reason,
                        },
                    ))
                })
                .collect();
            plan.components.push(ComponentPlan {
                members,
                order,
                dependencies,
            });
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.aborted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.components.iter().map(|c| c.members.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::traits::ContainerState;
    use crate::types::{ContainerId, ImageId, ImageRef};
    use crate::update::policy::{DEPENDS_ON_LABEL, ENABLE_LABEL};
    use std::collections::HashMap;

    fn name(value: &str) -> ContainerName {
        ContainerName::new(value).unwrap()
    }

    fn digest() -> Digest {
        Digest::parse("sha256:bb").unwrap()
    }

    fn record(n: &str, labels: &[(&str, &str)]) -> ContainerRecord {
        ContainerRecord {
            id: ContainerId::new(format!("id-{n}")),
            name: name(n),
            image: ImageRef::parse("app:1").unwrap(),
            image_id: ImageId::new("sha256:aa"),
            digest: Some(Digest::parse("sha256:aa").unwrap()),
            links: BTreeSet::new(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            state: ContainerState::Running,
        }
    }

    fn stale(names: &[&str]) -> BTreeMap<ContainerName, Digest> {
        names.iter().map(|n| (name(n), digest())).collect()
    }

    fn fleet() -> Vec<ContainerRecord> {
        vec![
            record("db", &[]),
            record("api", &[(DEPENDS_ON_LABEL, "db")]),
            record("admin", &[(DEPENDS_ON_LABEL, "db"), (ENABLE_LABEL, "false")]),
            record("web", &[(DEPENDS_ON_LABEL, "admin")]),
        ]
    }

    #[test]
    fn current_dependents_stay_out_by_default() {
        let plan = UpdatePlan::build(
            &fleet(),
            &stale(&["db"]),
            &BTreeSet::new(),
            &UpdatePolicy::default(),
        );
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn cascade_skips_opted_out_and_stops_there() {
        let policy = UpdatePolicy {
            restart_dependents: true,
            ..Default::default()
        };
        let plan = UpdatePlan::build(&fleet(), &stale(&["db"]), &BTreeSet::new(), &policy);
        let component = &plan.components[0];
        let names: Vec<&str> = component.names().map(ContainerName::as_str).collect();
        assert_eq!(names, vec!["api", "db"]);
        assert_eq!(
            component.members[&name("api")].reason,
            PlanReason::Forced {
                dependency: name("db")
            }
        );
    }

    #[test]
    fn favor_force_pulls_opted_out_into_the_chain() {
        let policy = UpdatePolicy {
            restart_dependents: true,
            opt_out_precedence: OptOutPrecedence::FavorForce,
            ..Default::default()
        };
        let plan = UpdatePlan::build(&fleet(), &stale(&["db"]), &BTreeSet::new(), &policy);
        let order: Vec<&str> = plan.components[0]
            .order
            .start
            .iter()
            .map(ContainerName::as_str)
            .collect();
        assert_eq!(order, vec!["db", "admin", "api", "web"]);
    }

    fn held_db() -> BTreeMap<ContainerName, (Digest, ContainerName)> {
        BTreeMap::from([(name("db"), (digest(), name("api")))])
    }

    #[test]
    fn favor_force_replaces_held_dependency_in_the_same_component() {
        let records = vec![
            record("db", &[(ENABLE_LABEL, "false")]),
            record("api", &[(DEPENDS_ON_LABEL, "db")]),
        ];
        let policy = UpdatePolicy {
            opt_out_precedence: OptOutPrecedence::FavorForce,
            ..Default::default()
        };
        let plan = UpdatePlan::build_with_held(
            &records,
            &stale(&["api"]),
            &held_db(),
            &BTreeSet::new(),
            &policy,
        );

        assert_eq!(plan.components.len(), 1);
        let component = &plan.components[0];
        assert_eq!(
            component.members[&name("db")].reason,
            PlanReason::Held {
                latest: digest(),
                dependent: name("api")
            }
        );
        let start: Vec<&str> = component.order.start.iter().map(ContainerName::as_str).collect();
        assert_eq!(start, vec!["db", "api"]);
    }

    #[test]
    fn favor_skip_ignores_held_dependency() {
        let records = vec![
            record("db", &[(ENABLE_LABEL, "false")]),
            record("api", &[(DEPENDS_ON_LABEL, "db")]),
        ];
        let plan = UpdatePlan::build_with_held(
            &records,
            &stale(&["api"]),
            &held_db(),
            &BTreeSet::new(),
            &UpdatePolicy::default(),
        );

        let names: Vec<&str> = plan.components[0].names().map(ContainerName::as_str).collect();
        assert_eq!(names, vec!["api"]);
    }

    #[test]
    fn malformed_label_aborts_its_component_only() {
        let records = vec![
            record("a", &[(DEPENDS_ON_LABEL, "b,!!")]),
            record("b", &[]),
            record("c", &[]),
        ];
        let plan = UpdatePlan::build(
            &records,
            &stale(&["a", "c"]),
            &BTreeSet::new(),
            &UpdatePolicy::default(),
        );
        assert_eq!(plan.aborted.len(), 1);
        assert_eq!(plan.aborted[0].containers, vec![name("a")]);
        assert_eq!(plan.components.len(), 1);
    }
}
