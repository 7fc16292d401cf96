// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Language handler collaborator interface.
//!
//! The core does not itself know how to compile or link anything; it calls
//! out to a `LanguageHandler` implementation, once per language/toolchain,
//! to actually run a build step inside the sandbox the scheduler prepared.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::hash::ContentHash;
use crate::ids::TargetId;
use crate::sandbox::SandboxSpec;

/// A single import/dependency edge discovered by static analysis of a
/// source file, used to feed the graph builder before scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Outcome of a successful `build_with_context` call.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub output_hash: ContentHash,
    pub outputs: Vec<PathBuf>,
}

/// Implemented once per language/toolchain; invoked by the scheduler inside
/// a prepared sandbox.
pub trait LanguageHandler: Send + Sync {
    /// Execute `target`'s build step with resolved `sources` and `deps`
    /// inside `sandbox`. `language_config` is the opaque key/value map the
    /// configuration layer declared for this target; this crate never reads
    /// or validates its contents, it only carries it through.
    fn build_with_context(
        &self,
        target: &TargetId,
        sources: &[PathBuf],
        deps: &[TargetId],
        language_config: &HashMap<String, String>,
        sandbox: &SandboxSpec,
    ) -> crate::error::Result<BuildOutcome>;

    /// Statically analyze `sources` for import/dependency edges, feeding
    /// the graph builder before any scheduling happens.
    fn analyze_imports(&self, sources: &[PathBuf]) -> crate::error::Result<Vec<Import>>;

    /// Declared output paths for `target`, known before the build runs
    /// (used to populate a `SandboxSpec`'s output set).
    fn outputs(&self, target: &TargetId) -> Vec<PathBuf>;

    /// Whether `target` needs rebuilding given the outcome of a cache
    /// lookup the scheduler already performed; handlers that have no
    /// opinion beyond the cache's own verdict simply return it unchanged.
    fn needs_rebuild(&self, _target: &TargetId, cached: bool) -> bool {
        !cached
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
