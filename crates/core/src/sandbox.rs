// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Hermetic sandbox model.
//!
//! Models allowed filesystem interaction as sets over canonical absolute
//! paths — input (I), output (O), temp (T), network egress flags (N),
//! allowed env keys (E), and resource limits (R) — and validates the
//! disjointness invariants that make a sandbox hermetic. This module is
//! pure set algebra: it does not itself enforce isolation at the OS level.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A set of canonical paths, with containment by exact match or
/// directory-prefix match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet(BTreeSet<PathBuf>);

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self(paths.into_iter().collect())
    }

    pub fn insert(&mut self, path: PathBuf) {
        self.0.insert(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.0
            .iter()
            .any(|p| path == p || path.starts_with(p))
    }

    pub fn union(&self, other: &PathSet) -> PathSet {
        PathSet(self.0.union(&other.0).cloned().collect())
    }

    /// Exact-path intersection. Prefix relationships are still caught by
    /// `disjoint`, which is the check `validate()` actually relies on.
    pub fn intersection(&self, other: &PathSet) -> PathSet {
        PathSet(self.0.intersection(&other.0).cloned().collect())
    }

    /// Whether any path in `self` is contained by (or contains) any path in
    /// `other`, accounting for directory-prefix relationships in either
    /// direction.
    pub fn disjoint(&self, other: &PathSet) -> bool {
        self.0
            .iter()
            .all(|a| other.0.iter().all(|b| a != b && !a.starts_with(b) && !b.starts_with(a)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Network egress policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkPolicy {
    /// When true, every other flag below must be false (`validate()`
    /// enforces this).
    pub hermetic: bool,
    pub allow_dns: bool,
    pub allow_outbound: bool,
}

/// Resource bounds enforced on the sandboxed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_memory_bytes: u64,
    pub max_cpu_time_ms: u64,
    pub max_processes: u32,
    pub max_file_descriptors: u32,
    pub max_output_bytes: u64,
}

impl ResourceLimits {
    /// Default hermetic profile: 4 GiB memory, 1 hour CPU, 128 processes,
    /// 512 FDs, 100 MiB output cap.
    pub fn hermetic_defaults() -> Self {
        Self {
            max_memory_bytes: 4 * 1024 * 1024 * 1024,
            max_cpu_time_ms: 60 * 60 * 1000,
            max_processes: 128,
            max_file_descriptors: 512,
            max_output_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Whether the sandboxed process may fork/exec children, and how many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessPolicy {
    pub allow_fork_exec: bool,
    pub max_children: u32,
    /// All children are terminated when the parent exits, regardless of
    /// this flag; this only controls whether fork/exec is permitted at all.
    pub terminate_children_on_exit: bool,
}

impl Default for ProcessPolicy {
    fn default() -> Self {
        Self {
            allow_fork_exec: true,
            max_children: 32,
            terminate_children_on_exit: true,
        }
    }
}

/// A complete hermetic sandbox specification.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub inputs: PathSet,
    pub outputs: PathSet,
    pub temp: PathSet,
    pub network: NetworkPolicy,
    pub env_allowed: BTreeSet<String>,
    pub resources: ResourceLimits,
    pub process_policy: ProcessPolicy,
}

impl SandboxSpec {
    pub fn new(inputs: PathSet, outputs: PathSet, temp: PathSet) -> Self {
        Self {
            inputs,
            outputs,
            temp,
            network: NetworkPolicy::default(),
            env_allowed: BTreeSet::new(),
            resources: ResourceLimits::hermetic_defaults(),
            process_policy: ProcessPolicy::default(),
        }
    }

    /// Enforce the disjointness and hermetic-network invariants.
    pub fn validate(&self) -> Result<()> {
        if !self.inputs.disjoint(&self.outputs) {
            return Err(Error::SandboxViolation {
                reason: "inputs and outputs are not disjoint".to_string(),
            });
        }
        if !self.inputs.disjoint(&self.temp) {
            return Err(Error::SandboxViolation {
                reason: "temp shadows an input path".to_string(),
            });
        }
        if self.network.hermetic && (self.network.allow_dns || self.network.allow_outbound) {
            return Err(Error::SandboxViolation {
                reason: "hermetic network policy has an egress flag set".to_string(),
            });
        }
        Ok(())
    }

    pub fn can_read(&self, path: &Path) -> bool {
        self.inputs.contains(path) || self.temp.contains(path)
    }

    pub fn can_write(&self, path: &Path) -> bool {
        self.outputs.contains(path) || self.temp.contains(path)
    }

    pub fn env_allowed(&self, key: &str) -> bool {
        self.env_allowed.contains(key)
    }
}

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod tests;
