// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Build graph.
//!
//! Nodes are keyed and edged by `TargetId` string, never by pointer, so the
//! graph carries no cyclic strong ownership that would retain memory
//! indefinitely. Status, retry count, and pending-dependency count live in
//! atomics so the scheduler can transition them without a lock.
//!
//! Internal invariants ("the node we just looked up is still there",
//! "the dependents mutex is never held across a panic") are asserted with
//! `.expect()` rather than propagated as `Result`, since violating them
//! would mean a bug in this module, not a caller error.
#![allow(clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::ids::{Target, TargetId};

/// Whether cycle-checking happens eagerly on `add_dependency` or is
/// deferred to a single `validate()` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleCheckMode {
    Immediate,
    Deferred,
}

/// A node's lifecycle state, stored as a single atomic byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeStatus {
    Pending = 0,
    Building = 1,
    Success = 2,
    Failed = 3,
    Cached = 4,
}

impl NodeStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => NodeStatus::Pending,
            1 => NodeStatus::Building,
            2 => NodeStatus::Success,
            3 => NodeStatus::Failed,
            4 => NodeStatus::Cached,
            _ => unreachable!("invalid node status byte"),
        }
    }
}

/// One node in the build graph. Status/retry/pendingDeps are atomics so the
/// scheduler can update them without taking the graph's structural lock.
pub struct BuildNode {
    pub target: TargetId,
    status: AtomicU8,
    retry_count: AtomicU32,
    pending_deps: AtomicU32,
    deps: Vec<TargetId>,
    dependents: Mutex<Vec<TargetId>>,
    meta: Mutex<Option<Target>>,
}

impl BuildNode {
    fn new(target: TargetId) -> Self {
        Self {
            target,
            status: AtomicU8::new(NodeStatus::Pending as u8),
            retry_count: AtomicU32::new(0),
            pending_deps: AtomicU32::new(0),
            deps: Vec::new(),
            dependents: Mutex::new(Vec::new()),
            meta: Mutex::new(None),
        }
    }

    /// The configuration layer's full target record, if one was attached
    /// via `BuildGraph::set_target_meta` or `add_target_full`. A node added
    /// through the plain `add_target` stays `None` — the graph's structural
    /// algorithms never need it, only collaborators that read kind, sources,
    /// or the language-config map do.
    pub fn meta(&self) -> Option<Target> {
        self.meta.lock().expect("meta mutex poisoned").clone()
    }

    fn set_meta(&self, meta: Target) {
        *self.meta.lock().expect("meta mutex poisoned") = Some(meta);
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: NodeStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Compare-and-swap the status. Returns `true` on success.
    pub fn cas_status(&self, expected: NodeStatus, new: NodeStatus) -> bool {
        self.status
            .compare_exchange(
                expected as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    pub fn increment_retry(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn pending_deps(&self) -> u32 {
        self.pending_deps.load(Ordering::Acquire)
    }

    /// Atomically decrement `pendingDeps`, returning the value after the
    /// decrement. Saturates at zero (never wraps below it).
    pub fn decrement_pending_deps(&self) -> u32 {
        loop {
            let current = self.pending_deps.load(Ordering::Acquire);
            if current == 0 {
                return 0;
            }
            if self
                .pending_deps
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return current - 1;
            }
        }
    }

    pub fn deps(&self) -> &[TargetId] {
        &self.deps
    }

    /// Snapshot of the targets that directly depend on this node. Used by
    /// the scheduler to cascade a failure or wake newly-ready work.
    pub fn dependents(&self) -> Vec<TargetId> {
        self.dependents.lock().expect("dependents mutex poisoned").clone()
    }
}

/// The build graph: a DAG of `BuildNode`s keyed by `TargetId`.
pub struct BuildGraph {
    mode: CycleCheckMode,
    nodes: HashMap<String, BuildNode>,
    order: Vec<String>,
    validated: bool,
    depth_cache: Mutex<HashMap<String, u32>>,
}

/// Aggregate graph statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub max_depth: u32,
    pub max_parallelism: usize,
    pub critical_path_length: u32,
}

impl BuildGraph {
    pub fn new(mode: CycleCheckMode) -> Self {
        Self {
            mode,
            nodes: HashMap::new(),
            order: Vec::new(),
            validated: false,
            depth_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> CycleCheckMode {
        self.mode
    }

    pub fn add_target(&mut self, target: TargetId) -> Result<()> {
        let key = target.as_str().to_string();
        if self.nodes.contains_key(&key) {
            return Err(Error::DuplicateTarget { target });
        }
        self.order.push(key.clone());
        self.nodes.insert(key, BuildNode::new(target));
        self.validated = false;
        Ok(())
    }

    /// Add a target together with the configuration layer's full record
    /// (kind, declared sources, declared deps, language-config map), so
    /// collaborators can later read it back via `BuildNode::meta`.
    pub fn add_target_full(&mut self, target: Target) -> Result<()> {
        let id = target.id.clone();
        self.add_target(id.clone())?;
        self.set_target_meta(&id, target)
    }

    /// Attach or replace the configuration-layer record for an
    /// already-added target.
    pub fn set_target_meta(&mut self, target: &TargetId, meta: Target) -> Result<()> {
        let node = self
            .nodes
            .get(target.as_str())
            .ok_or_else(|| Error::NodeNotFound {
                target: target.clone(),
            })?;
        node.set_meta(meta);
        Ok(())
    }

    /// Add a dependency edge `from -> to` (`from` depends on `to`). In
    /// `Immediate` mode, runs a DFS from `to` looking for `from`; a positive
    /// hit means adding this edge would create a cycle.
    pub fn add_dependency(&mut self, from: &TargetId, to: &TargetId) -> Result<()> {
        if !self.nodes.contains_key(from.as_str()) {
            return Err(Error::NodeNotFound {
                target: from.clone(),
            });
        }
        if !self.nodes.contains_key(to.as_str()) {
            return Err(Error::NodeNotFound { target: to.clone() });
        }

        if self.mode == CycleCheckMode::Immediate && self.reaches(to.as_str(), from.as_str()) {
            return Err(Error::GraphCycle {
                target: from.clone(),
            });
        }

        let node = self.nodes.get_mut(from.as_str()).expect("checked above");
        node.deps.push(to.clone());
        node.pending_deps.fetch_add(1, Ordering::AcqRel);

        let to_node = self.nodes.get(to.as_str()).expect("checked above");
        to_node.dependents.lock().expect("dependents mutex poisoned").push(from.clone());

        self.validated = false;
        self.depth_cache.lock().expect("depth cache poisoned").clear();
        Ok(())
    }

    fn reaches(&self, start: &str, target: &str) -> bool {
        let mut stack = vec![start.to_string()];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                for dep in &node.deps {
                    stack.push(dep.as_str().to_string());
                }
            }
        }
        false
    }

    /// O(V+E) Kahn's-algorithm topological sort that both detects cycles
    /// and marks the graph validated.
    pub fn validate(&mut self) -> Result<()> {
        self.topological_sort()?;
        self.validated = true;
        Ok(())
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn topological_sort(&self) -> Result<Vec<TargetId>> {
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        for key in &self.order {
            indegree.insert(key.as_str(), self.nodes[key].deps.len());
        }

        let mut queue: Vec<&str> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(k, _)| *k)
            .collect();
        queue.sort();

        let mut sorted = Vec::with_capacity(self.order.len());
        let mut cursor = 0;
        while cursor < queue.len() {
            let current = queue[cursor];
            cursor += 1;
            sorted.push(self.nodes[current].target.clone());

            let dependents = self.nodes[current].dependents.lock().expect("dependents mutex poisoned");
            let mut next_batch = Vec::new();
            for dependent in dependents.iter() {
                let deg = indegree.get_mut(dependent.as_str()).expect("dependent must be a node");
                *deg -= 1;
                if *deg == 0 {
                    next_batch.push(dependent.as_str());
                }
            }
            next_batch.sort();
            queue.extend(next_batch);
        }

        if sorted.len() != self.order.len() {
            let unresolved = self
                .order
                .iter()
                .find(|k| indegree.get(k.as_str()).copied().unwrap_or(0) > 0)
                .expect("some node must remain unresolved when a cycle exists");
            return Err(Error::GraphCycle {
                target: self.nodes[unresolved].target.clone(),
            });
        }

        Ok(sorted)
    }

    /// Nodes that are `Pending` with every dependency in `{Success, Cached}`.
    pub fn ready_nodes(&self) -> Vec<&TargetId> {
        self.order
            .iter()
            .filter_map(|key| {
                let node = &self.nodes[key];
                if node.status() != NodeStatus::Pending {
                    return None;
                }
                let all_deps_done = node.deps.iter().all(|dep| {
                    let dep_node = &self.nodes[dep.as_str()];
                    matches!(dep_node.status(), NodeStatus::Success | NodeStatus::Cached)
                });
                all_deps_done.then_some(&node.target)
            })
            .collect()
    }

    /// Memoized longest-path length from a root (a node with no deps).
    /// Uses a visited-set to terminate without looping forever if a cycle
    /// is introduced before `validate()` has run.
    pub fn depth(&self, target: &TargetId) -> Result<u32> {
        let mut cache = self.depth_cache.lock().expect("depth cache poisoned");
        self.depth_inner(target.as_str(), &mut cache, &mut HashSet::new())
    }

    fn depth_inner(
        &self,
        key: &str,
        cache: &mut HashMap<String, u32>,
        visiting: &mut HashSet<String>,
    ) -> Result<u32> {
        if let Some(&d) = cache.get(key) {
            return Ok(d);
        }
        let node = self.nodes.get(key).ok_or_else(|| Error::NodeNotFound {
            target: TargetId::new_unchecked(key.to_string()),
        })?;
        if node.deps.is_empty() {
            cache.insert(key.to_string(), 0);
            return Ok(0);
        }
        if !visiting.insert(key.to_string()) {
            return Err(Error::GraphCycle {
                target: node.target.clone(),
            });
        }
        let mut max_dep_depth = 0;
        for dep in &node.deps {
            let dep_depth = self.depth_inner(dep.as_str(), cache, visiting)?;
            max_dep_depth = max_dep_depth.max(dep_depth);
        }
        visiting.remove(key);
        let depth = max_dep_depth + 1;
        cache.insert(key.to_string(), depth);
        Ok(depth)
    }

    pub fn stats(&self) -> Result<GraphStats> {
        let total_nodes = self.order.len();
        let total_edges = self.order.iter().map(|k| self.nodes[k].deps.len()).sum();

        let mut max_depth = 0u32;
        let mut level_sizes: HashMap<u32, usize> = HashMap::new();
        for key in &self.order {
            let d = self.depth(&self.nodes[key].target)?;
            max_depth = max_depth.max(d);
            *level_sizes.entry(d).or_insert(0) += 1;
        }
        let max_parallelism = level_sizes.values().copied().max().unwrap_or(0);

        Ok(GraphStats {
            total_nodes,
            total_edges,
            max_depth,
            max_parallelism,
            critical_path_length: max_depth,
        })
    }

    /// For each node, `cost = own_cost + max(dependent_costs)`; returns the
    /// maximum accumulated cost, which is what the scheduler uses to order
    /// the ready queue by descending priority.
    pub fn critical_path(&self, cost_fn: impl Fn(&TargetId) -> u64) -> Result<HashMap<TargetId, u64>> {
        let sorted = self.topological_sort()?;
        let mut cost: HashMap<String, u64> = HashMap::new();

        // Process in reverse topological order so every dependent's cost is
        // already known when we compute a node's own cost.
        for target in sorted.iter().rev() {
            let node = &self.nodes[target.as_str()];
            let dependents = node.dependents.lock().expect("dependents mutex poisoned");
            let max_dependent_cost = dependents
                .iter()
                .map(|d| cost.get(d.as_str()).copied().unwrap_or(0))
                .max()
                .unwrap_or(0);
            cost.insert(target.as_str().to_string(), cost_fn(target) + max_dependent_cost);
        }

        Ok(sorted
            .into_iter()
            .map(|t| {
                let c = cost[t.as_str()];
                (t, c)
            })
            .collect())
    }

    pub fn node(&self, target: &TargetId) -> Option<&BuildNode> {
        self.nodes.get(target.as_str())
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetId> {
        self.order.iter().map(|k| &self.nodes[k].target)
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
