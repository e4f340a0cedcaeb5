// ABOUTME: Property tests for dependency ordering and component splitting.
// ABOUTME: Random acyclic graphs must order dependencies first and stop in exact reverse.

use lookout::types::ContainerName;
use lookout::update::{DependencyGraph, GraphError};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn name(i: usize) -> ContainerName {
    ContainerName::new(&format!("c{i:02}")).unwrap()
}

/// Node `i` may only depend on nodes with a lower index, so the graph is acyclic.
fn dag() -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1usize..14).prop_flat_map(|n| {
        (0..n)
            .map(|i| proptest::collection::btree_set(0..i.max(1), 0..=i.min(3)))
            .collect::<Vec<_>>()
    })
}

fn build(deps: &[BTreeSet<usize>]) -> DependencyGraph {
    DependencyGraph::new(
        deps.iter()
            .enumerate()
            .map(|(i, d)| (name(i), d.iter().map(|&j| name(j)).collect())),
    )
}

proptest! {
    #[test]
    fn stop_order_is_reverse_of_start_order(deps in dag()) {
        let graph = build(&deps);
        let all: BTreeSet<_> = (0..deps.len()).map(name).collect();
        let order = graph.order(&all).unwrap();

        let mut reversed = order.start.clone();
        reversed.reverse();
        prop_assert_eq!(&order.stop, &reversed);
        prop_assert_eq!(order.start.len(), all.len());
    }

    #[test]
    fn dependencies_start_first(deps in dag()) {
        let graph = build(&deps);
        let all: BTreeSet<_> = (0..deps.len()).map(name).collect();
        let order = graph.order(&all).unwrap();

        let position = |n: &ContainerName| order.start.iter().position(|x| x == n).unwrap();
        for (i, ds) in deps.iter().enumerate() {
            for &j in ds {
                prop_assert!(position(&name(j)) < position(&name(i)));
            }
        }
    }

    #[test]
    fn components_partition_the_subset(deps in dag()) {
        let graph = build(&deps);
        let all: BTreeSet<_> = (0..deps.len()).map(name).collect();
        let components = graph.components(&all);

        let mut seen = BTreeSet::new();
        for component in &components {
            for member in component {
                prop_assert!(seen.insert(member.clone()), "{} in two components", member);
            }
        }
        prop_assert_eq!(seen, all);
        for (i, ds) in deps.iter().enumerate() {
            for &j in ds {
                let together = components
                    .iter()
                    .any(|c| c.contains(&name(i)) && c.contains(&name(j)));
                prop_assert!(together);
            }
        }
    }

    #[test]
    fn order_is_deterministic(deps in dag()) {
        let all: BTreeSet<_> = (0..deps.len()).map(name).collect();
        let first = build(&deps).order(&all).unwrap();
        let second = build(&deps).order(&all).unwrap();
        prop_assert_eq!(first, second);
    }
}

#[test]
fn cycle_is_reported_with_its_members_only() {
    // a <-> b form a cycle; c depends on a but is not part of it.
    let graph = DependencyGraph::new([
        (name(0), BTreeSet::from([name(1)])),
        (name(1), BTreeSet::from([name(0)])),
        (name(2), BTreeSet::from([name(0)])),
    ]);
    let all: BTreeSet<_> = (0..3).map(name).collect();

    match graph.order(&all) {
        Err(GraphError::CyclicDependency { containers }) => {
            assert_eq!(containers, vec![name(0), name(1)]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn subset_ignores_edges_leaving_it() {
    let graph = DependencyGraph::new([
        (name(0), BTreeSet::new()),
        (name(1), BTreeSet::from([name(0)])),
        (name(2), BTreeSet::from([name(1)])),
    ]);
    let subset = BTreeSet::from([name(0), name(2)]);
    let order = graph.order(&subset).unwrap();
    assert_eq!(order.start, vec![name(0), name(2)]);
}
