// ABOUTME: Dependency graph over a snapshot: who must run before whom.
// ABOUTME: Deterministic start/stop orders, connected components and cycle reporting.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::error::GraphError;
use super::policy::declared_dependencies;
use crate::runtime::traits::ContainerRecord;
use crate::types::ContainerName;

/// Start and stop linearization of a set of containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Dependencies first; ties broken by ascending name.
    pub start: Vec<ContainerName>,
    /// Exact reverse of `start`.
    pub stop: Vec<ContainerName>,
}

/// Edge `a -> b` means `a` depends on `b`. Edges to names outside the
/// snapshot are dropped.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<ContainerName>,
    dependencies: BTreeMap<ContainerName, BTreeSet<ContainerName>>,
    dependents: BTreeMap<ContainerName, BTreeSet<ContainerName>>,
    malformed: BTreeMap<ContainerName, String>,
}

impl DependencyGraph {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ContainerName, BTreeSet<ContainerName>)>,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        let nodes: BTreeSet<ContainerName> = entries.iter().map(|(n, _)| n.clone()).collect();
        let mut graph = DependencyGraph {
            nodes,
            ..Default::default()
        };
        for (name, deps) in entries {
            for dep in deps {
                if !graph.nodes.contains(&dep) {
                    tracing::debug!(
                        container = %name,
                        dependency = %dep,
                        "ignoring dependency outside snapshot"
                    );
                    continue;
                }
                graph
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(name.clone());
                graph.dependencies.entry(name.clone()).or_default().insert(dep);
            }
        }
        graph
    }

    /// Build from runtime links and `lookout.depends-on` labels.
    ///
    /// A record with an unparseable label keeps its runtime links and is
    /// remembered as malformed.
    pub fn from_records(records: &[ContainerRecord]) -> Self {
        let mut malformed = BTreeMap::new();
        let entries: Vec<_> = records
            .iter()
            .map(|record| {
                let deps = declared_dependencies(record).unwrap_or_else(|value| {
                    malformed.insert(record.name.clone(), value);
                    record.links.clone()
                });
                (record.name.clone(), deps)
            })
            .collect();
        let mut graph = Self::new(entries);
        graph.malformed = malformed;
        graph
    }

    pub fn contains(&self, name: &ContainerName) -> bool {
        self.nodes.contains(name)
    }

    pub fn dependencies(&self, name: &ContainerName) -> impl Iterator<Item = &ContainerName> {
        self.dependencies.get(name).into_iter().flatten()
    }

    pub fn dependents(&self, name: &ContainerName) -> impl Iterator<Item = &ContainerName> {
        self.dependents.get(name).into_iter().flatten()
    }

    pub fn malformed(&self, name: &ContainerName) -> Option<GraphError> {
        self.malformed
            .get(name)
            .map(|value| GraphError::MalformedDependency {
                container: name.clone(),
                value: value.clone(),
            })
    }

    /// Connected components of the subgraph induced by `subset`, ignoring
    /// edge direction. Ordered by their smallest member.
    pub fn components(&self, subset: &BTreeSet<ContainerName>) -> Vec<BTreeSet<ContainerName>> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::new();
        for start in subset {
            if seen.contains(start) {
                continue;
            }
            let mut component = BTreeSet::new();
            let mut queue = VecDeque::from([start.clone()]);
            seen.insert(start.clone());
            while let Some(node) = queue.pop_front() {
                for next in self.dependencies(&node).chain(self.dependents(&node)) {
                    if subset.contains(next) && seen.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
                component.insert(node);
            }
            components.push(component);
        }
        components
    }

    /// Topological order of the subgraph induced by `subset`.
    pub fn order(&self, subset: &BTreeSet<ContainerName>) -> Result<Order, GraphError> {
        let mut pending: BTreeMap<&ContainerName, usize> = subset
            .iter()
            .map(|n| (n, self.dependencies(n).filter(|d| subset.contains(*d)).count()))
            .collect();
        let mut ready: BTreeSet<&ContainerName> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(n, _)| *n)
            .collect();

        let mut start = Vec::with_capacity(subset.len());
        while let Some(node) = ready.pop_first() {
            pending.remove(node);
            start.push(node.clone());
            for dependent in self.dependents(node).filter(|d| subset.contains(*d)) {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if !pending.is_empty() {
            let remaining: BTreeSet<ContainerName> =
                pending.into_keys().cloned().collect();
            return Err(GraphError::CyclicDependency {
                containers: self.cycle_members(remaining),
            });
        }

        let stop = start.iter().rev().cloned().collect();
        Ok(Order { start, stop })
    }

    /// Peel off nodes that only wait on a cycle without being part of one.
    fn cycle_members(&self, mut remaining: BTreeSet<ContainerName>) -> Vec<ContainerName> {
        loop {
            let leaves: Vec<ContainerName> = remaining
                .iter()
                .filter(|n| !self.dependents(n).any(|d| remaining.contains(d)))
                .cloned()
                .collect();
            if leaves.is_empty() {
                return remaining.into_iter().collect();
            }
            for leaf in leaves {
                remaining.remove(&leaf);
            }
        }
    }

    /// Everything that transitively depends on `seeds`, walking only through
    /// nodes `admit` accepts. Seeds are not included.
    pub fn dependents_closure<F>(
        &self,
        seeds: &BTreeSet<ContainerName>,
        mut admit: F,
    ) -> BTreeMap<ContainerName, ContainerName>
    where
        F: FnMut(&ContainerName) -> bool,
    {
        let mut reached = BTreeMap::new();
        let mut queue: VecDeque<&ContainerName> = seeds.iter().collect();
        while let Some(node) = queue.pop_front() {
            for dependent in self.dependents(node) {
                if seeds.contains(dependent) || reached.contains_key(dependent) {
                    continue;
                }
                if !admit(dependent) {
                    continue;
                }
                reached.insert(dependent.clone(), node.clone());
                queue.push_back(dependent);
            }
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> ContainerName {
        ContainerName::new(value).unwrap()
    }

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        DependencyGraph::new(
            edges
                .iter()
                .map(|(n, deps)| (name(n), deps.iter().map(|d| name(d)).collect())),
        )
    }

    fn set(names: &[&str]) -> BTreeSet<ContainerName> {
        names.iter().map(|n| name(n)).collect()
    }

    fn strings(names: &[ContainerName]) -> Vec<&str> {
        names.iter().map(ContainerName::as_str).collect()
    }

    #[test]
    fn web_after_db() {
        let g = graph(&[("web", &["db"]), ("db", &[])]);
        let order = g.order(&set(&["web", "db"])).unwrap();
        assert_eq!(strings(&order.start), vec!["db", "web"]);
        assert_eq!(strings(&order.stop), vec!["web", "db"]);
    }

    #[test]
    fn ties_break_by_name() {
        let g = graph(&[("c", &[]), ("a", &[]), ("b", &["a"]), ("d", &["a"])]);
        let order = g.order(&set(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(strings(&order.start), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn cycle_names_only_its_members() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("x", &["a"])]);
        let err = g.order(&set(&["a", "b", "x"])).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                containers: vec![name("a"), name("b")]
            }
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let g = graph(&[("a", &["a"])]);
        assert!(g.order(&set(&["a"])).is_err());
    }

    #[test]
    fn components_split_on_induced_edges() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &["d"]), ("d", &[])]);
        let components = g.components(&set(&["a", "b", "c", "d"]));
        assert_eq!(components, vec![set(&["a", "b"]), set(&["c", "d"])]);
    }

    #[test]
    fn unknown_dependencies_are_dropped() {
        let g = graph(&[("web", &["ghost"])]);
        assert_eq!(g.dependencies(&name("web")).count(), 0);
    }

    #[test]
    fn closure_stops_at_refused_nodes() {
        let g = graph(&[
            ("db", &[]),
            ("api", &["db"]),
            ("web", &["api"]),
            ("worker", &["db"]),
        ]);
        let reached = g.dependents_closure(&set(&["db"]), |n| n.as_str() != "api");
        let names: Vec<&str> = reached.keys().map(ContainerName::as_str).collect();
        assert_eq!(names, vec!["worker"]);
        assert_eq!(reached[&name("worker")].as_str(), "db");
    }
}
