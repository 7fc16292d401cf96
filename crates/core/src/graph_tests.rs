// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn t(name: &str) -> TargetId {
    TargetId::parse(&format!("//pkg:{name}")).unwrap()
}

fn linear_graph() -> BuildGraph {
    let mut g = BuildGraph::new(CycleCheckMode::Immediate);
    g.add_target(t("a")).unwrap();
    g.add_target(t("b")).unwrap();
    g.add_target(t("c")).unwrap();
    // c depends on b depends on a
    g.add_dependency(&t("b"), &t("a")).unwrap();
    g.add_dependency(&t("c"), &t("b")).unwrap();
    g
}

#[test]
fn duplicate_target_is_rejected() {
    let mut g = BuildGraph::new(CycleCheckMode::Immediate);
    g.add_target(t("a")).unwrap();
    assert!(matches!(g.add_target(t("a")), Err(Error::DuplicateTarget { .. })));
}

#[test]
fn dependency_on_missing_node_is_rejected() {
    let mut g = BuildGraph::new(CycleCheckMode::Immediate);
    g.add_target(t("a")).unwrap();
    assert!(matches!(
        g.add_dependency(&t("a"), &t("missing")),
        Err(Error::NodeNotFound { .. })
    ));
}

#[test]
fn immediate_mode_rejects_cycle_on_add() {
    let mut g = BuildGraph::new(CycleCheckMode::Immediate);
    g.add_target(t("a")).unwrap();
    g.add_target(t("b")).unwrap();
    g.add_dependency(&t("a"), &t("b")).unwrap();
    assert!(matches!(
        g.add_dependency(&t("b"), &t("a")),
        Err(Error::GraphCycle { .. })
    ));
}

#[test]
fn deferred_mode_allows_cycle_until_validate() {
    let mut g = BuildGraph::new(CycleCheckMode::Deferred);
    g.add_target(t("a")).unwrap();
    g.add_target(t("b")).unwrap();
    g.add_dependency(&t("a"), &t("b")).unwrap();
    g.add_dependency(&t("b"), &t("a")).unwrap();
    assert!(matches!(g.validate(), Err(Error::GraphCycle { .. })));
}

#[test]
fn topological_sort_orders_dependencies_first() {
    let g = linear_graph();
    let sorted = g.topological_sort().unwrap();
    let positions: Vec<&str> = sorted.iter().map(|t| t.as_str()).collect();
    let pos_a = positions.iter().position(|p| p.ends_with(":a")).unwrap();
    let pos_b = positions.iter().position(|p| p.ends_with(":b")).unwrap();
    let pos_c = positions.iter().position(|p| p.ends_with(":c")).unwrap();
    assert!(pos_a < pos_b);
    assert!(pos_b < pos_c);
}

#[test]
fn ready_nodes_are_those_with_satisfied_deps() {
    let g = linear_graph();
    let ready = g.ready_nodes();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].as_str(), t("a").as_str());
}

#[test]
fn ready_nodes_updates_as_deps_complete() {
    let g = linear_graph();
    g.node(&t("a")).unwrap().set_status(NodeStatus::Success);
    let ready = g.ready_nodes();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].as_str(), t("b").as_str());
}

#[test]
fn depth_is_memoized_longest_path() {
    let g = linear_graph();
    assert_eq!(g.depth(&t("a")).unwrap(), 0);
    assert_eq!(g.depth(&t("b")).unwrap(), 1);
    assert_eq!(g.depth(&t("c")).unwrap(), 2);
}

#[test]
fn stats_report_depth_and_parallelism() {
    let g = linear_graph();
    let stats = g.stats().unwrap();
    assert_eq!(stats.total_nodes, 3);
    assert_eq!(stats.total_edges, 2);
    assert_eq!(stats.max_depth, 2);
    assert_eq!(stats.max_parallelism, 1);
}

#[test]
fn wide_graph_has_higher_parallelism() {
    let mut g = BuildGraph::new(CycleCheckMode::Immediate);
    g.add_target(t("root")).unwrap();
    for leaf in ["leaf1", "leaf2", "leaf3"] {
        g.add_target(t(leaf)).unwrap();
        g.add_dependency(&t(leaf), &t("root")).unwrap();
    }
    let stats = g.stats().unwrap();
    assert_eq!(stats.max_parallelism, 3);
}

#[test]
fn pending_deps_decrement_atomically() {
    let g = linear_graph();
    let b = g.node(&t("b")).unwrap();
    assert_eq!(b.pending_deps(), 1);
    assert_eq!(b.decrement_pending_deps(), 0);
    assert_eq!(b.decrement_pending_deps(), 0);
}

#[test]
fn cas_status_fails_on_mismatch() {
    let g = linear_graph();
    let a = g.node(&t("a")).unwrap();
    assert!(!a.cas_status(NodeStatus::Building, NodeStatus::Success));
    assert!(a.cas_status(NodeStatus::Pending, NodeStatus::Building));
}

#[test]
fn critical_path_accumulates_dependent_cost() {
    let g = linear_graph();
    let costs = g.critical_path(|_| 1).unwrap();
    assert_eq!(costs[&t("c")], 1);
    assert_eq!(costs[&t("b")], 2);
    assert_eq!(costs[&t("a")], 3);
}

#[test]
fn node_added_without_meta_reports_none() {
    let g = linear_graph();
    assert!(g.node(&t("a")).unwrap().meta().is_none());
}

#[test]
fn add_target_full_attaches_the_configuration_record() {
    let mut g = BuildGraph::new(CycleCheckMode::Immediate);
    let target = crate::ids::Target::new(t("a"), crate::ids::TargetKind::Library)
        .with_sources(vec![std::path::PathBuf::from("a.rs")]);
    g.add_target_full(target.clone()).unwrap();

    let meta = g.node(&t("a")).unwrap().meta().unwrap();
    assert_eq!(meta.kind, crate::ids::TargetKind::Library);
    assert_eq!(meta.sources, vec![std::path::PathBuf::from("a.rs")]);
}

#[test]
fn set_target_meta_on_missing_target_is_rejected() {
    let mut g = BuildGraph::new(CycleCheckMode::Immediate);
    let target = crate::ids::Target::new(t("missing"), crate::ids::TargetKind::Custom);
    assert!(matches!(
        g.set_target_meta(&t("missing"), target),
        Err(Error::NodeNotFound { .. })
    ));
}

#[test]
fn dependents_reports_direct_dependents_only() {
    let g = linear_graph();
    assert_eq!(g.node(&t("a")).unwrap().dependents(), vec![t("b")]);
    assert_eq!(g.node(&t("b")).unwrap().dependents(), vec![t("c")]);
    assert!(g.node(&t("c")).unwrap().dependents().is_empty());
}
