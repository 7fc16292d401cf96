// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Work-stealing build executor.
//!
//! Each worker thread owns a local `crossbeam_deque::Worker` and pulls
//! ready targets off a shared `Injector`, falling back to stealing from a
//! sibling's queue when its own and the global queue are both empty — the
//! canonical pattern from `crossbeam-deque`'s own documentation. A node's
//! `pending_deps` atomic drives readiness: the thread that decrements it to
//! zero is the one that pushes the now-ready dependent onto the queue, so no
//! node is ever scheduled twice. Panics inside a language handler are
//! isolated with `catch_unwind` so one bad build step can't take the whole
//! run down.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_deque::{Injector, Steal, Stealer, Worker};

use crate::coordinator::CacheCoordinator;
use crate::error::{Error, Result, Severity};
use crate::graph::{BuildGraph, NodeStatus};
use crate::handler::LanguageHandler;
use crate::hash::ContentHash;
use crate::ids::TargetId;
use crate::sandbox::SandboxSpec;

/// What happens to a node's dependents when it exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Mark every transitive dependent `Failed` immediately.
    FailFast,
    /// Treat the failed node as satisfying its dependents' `pendingDeps`;
    /// dependents still get scheduled and it's up to the language handler
    /// to decide what a missing upstream output means for them.
    KeepGoing,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub num_workers: usize,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub failure_mode: FailureMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            failure_mode: FailureMode::FailFast,
        }
    }
}

/// Supplies the per-target context the scheduler needs but doesn't own
/// itself: which files feed a target, what sandbox it builds in, and its
/// declared language-config map.
pub trait BuildContextProvider: Send + Sync {
    fn sources(&self, target: &TargetId) -> Vec<PathBuf>;
    fn sandbox(&self, target: &TargetId) -> SandboxSpec;

    /// The target's opaque language-config map, as declared by the
    /// configuration layer. Providers with nothing to contribute (tests,
    /// targets with no config) can rely on the empty default.
    fn language_config(&self, _target: &TargetId) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Outcome for a single target after scheduling finishes.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub target: TargetId,
    pub status: NodeStatus,
    pub error: Option<String>,
}

/// Outcome of a full `Scheduler::run` call.
#[derive(Debug, Clone)]
pub struct SchedulerReport {
    pub results: Vec<BuildResult>,
    pub cancelled: bool,
}

/// Cooperative cancellation flag shared between a scheduler run and its
/// caller; checking it is the workers' responsibility, not preemption.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Work-stealing scheduler over a validated `BuildGraph`.
pub struct Scheduler<'a> {
    graph: &'a BuildGraph,
    provider: &'a dyn BuildContextProvider,
    handler: &'a dyn LanguageHandler,
    coordinator: &'a CacheCoordinator,
    config: SchedulerConfig,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        graph: &'a BuildGraph,
        provider: &'a dyn BuildContextProvider,
        handler: &'a dyn LanguageHandler,
        coordinator: &'a CacheCoordinator,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            graph,
            provider,
            handler,
            coordinator,
            config,
        }
    }

    /// Run the whole graph to completion or cancellation. `graph` must
    /// already be validated — scheduling an unvalidated graph is a caller
    /// error, not something this function checks for.
    pub fn run(&self, cancellation: CancellationToken) -> Result<SchedulerReport> {
        let total = self.graph.targets().count();
        if total == 0 {
            return Ok(SchedulerReport {
                results: Vec::new(),
                cancelled: false,
            });
        }

        let remaining = AtomicUsize::new(total);
        let results: parking_lot::Mutex<Vec<BuildResult>> = parking_lot::Mutex::new(Vec::with_capacity(total));
        let retry_backoff: parking_lot::Mutex<HashMap<String, Instant>> = parking_lot::Mutex::new(HashMap::new());

        let injector: Injector<TargetId> = Injector::new();
        let priorities = self.graph.critical_path(|_| 1u64).unwrap_or_default();
        let mut initial: Vec<&TargetId> = self.graph.ready_nodes();
        initial.sort_by_key(|t| std::cmp::Reverse(priorities.get(*t).copied().unwrap_or(0)));
        for target in initial {
            injector.push(target.clone());
        }

        let workers: Vec<Worker<TargetId>> = (0..self.config.num_workers.max(1))
            .map(|_| Worker::new_fifo())
            .collect();
        let stealers: Vec<Stealer<TargetId>> = workers.iter().map(Worker::stealer).collect();

        std::thread::scope(|scope| {
            for worker in workers {
                let stealers = &stealers;
                let injector = &injector;
                let remaining = &remaining;
                let results = &results;
                let retry_backoff = &retry_backoff;
                let cancellation = cancellation.clone();
                scope.spawn(move || {
                    self.worker_loop(worker, injector, stealers, remaining, results, retry_backoff, &cancellation);
                });
            }
        });

        Ok(SchedulerReport {
            results: results.into_inner(),
            cancelled: cancellation.is_cancelled(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn worker_loop(
        &self,
        local: Worker<TargetId>,
        injector: &Injector<TargetId>,
        stealers: &[Stealer<TargetId>],
        remaining: &AtomicUsize,
        results: &parking_lot::Mutex<Vec<BuildResult>>,
        retry_backoff: &parking_lot::Mutex<HashMap<String, Instant>>,
        cancellation: &CancellationToken,
    ) {
        while remaining.load(Ordering::Acquire) > 0 {
            if cancellation.is_cancelled() {
                return;
            }
            match find_task(&local, injector, stealers) {
                Some(target) => {
                    if let Some(ready_at) = retry_backoff.lock().get(target.as_str()) {
                        if *ready_at > Instant::now() {
                            injector.push(target);
                            std::thread::yield_now();
                            continue;
                        }
                    }
                    self.process_one(&target, injector, remaining, results, retry_backoff, cancellation);
                }
                None => std::thread::yield_now(),
            }
        }
    }

    fn process_one(
        &self,
        target: &TargetId,
        injector: &Injector<TargetId>,
        remaining: &AtomicUsize,
        results: &parking_lot::Mutex<Vec<BuildResult>>,
        retry_backoff: &parking_lot::Mutex<HashMap<String, Instant>>,
        cancellation: &CancellationToken,
    ) {
        let node = match self.graph.node(target) {
            Some(n) => n,
            None => return,
        };

        if !node.cas_status(NodeStatus::Pending, NodeStatus::Building) {
            return;
        }

        let sources = self.provider.sources(target);
        let deps = self.resolve_dep_hashes(node.deps());

        let outcome = self
            .coordinator
            .is_cached(target, &sources, &deps)
            .and_then(|cached| {
                if cached {
                    Ok(BuildStep::Cached)
                } else {
                    self.build_one(target, &sources, node.deps())
                }
            });

        match outcome {
            Ok(BuildStep::Cached) => {
                node.set_status(NodeStatus::Cached);
                self.finish_node(target, NodeStatus::Cached, None, injector, remaining, results);
            }
            Ok(BuildStep::Built(output_hash)) => {
                let _ = self.coordinator.update(target.clone(), &sources, &deps, output_hash);
                node.set_status(NodeStatus::Success);
                self.finish_node(target, NodeStatus::Success, None, injector, remaining, results);
            }
            Err(err) => {
                if Severity::from(&err) == Severity::Retryable {
                    let retries = node.increment_retry();
                    if retries <= self.config.max_retries {
                        let backoff = self.backoff_for(retries);
                        retry_backoff.lock().insert(target.as_str().to_string(), Instant::now() + backoff);
                        node.set_status(NodeStatus::Pending);
                        injector.push(target.clone());
                        tracing::warn!(?target, attempt = retries, ?err, "build failed, retrying");
                        return;
                    }
                }

                // Mark every transitive dependent Failed before this node's
                // own completion touches `pending_deps`/the injector, so a
                // sibling worker can never CAS a doomed dependent into
                // Building in the gap between the two.
                node.set_status(NodeStatus::Failed);
                if self.config.failure_mode == FailureMode::FailFast {
                    self.cascade_failure(target, injector, remaining, results);
                }
                self.finish_node(
                    target,
                    NodeStatus::Failed,
                    Some(err.to_string()),
                    injector,
                    remaining,
                    results,
                );
                if matches!(err, Error::Cancelled) {
                    cancellation.cancel();
                }
            }
        }
    }

    fn resolve_dep_hashes(&self, deps: &[TargetId]) -> Vec<(TargetId, ContentHash)> {
        deps.iter()
            .filter_map(|d| self.coordinator.output_hash(d).map(|h| (d.clone(), h)))
            .collect()
    }

    fn build_one(&self, target: &TargetId, sources: &[PathBuf], deps: &[TargetId]) -> Result<BuildStep> {
        let sandbox = self.provider.sandbox(target);
        sandbox.validate()?;
        let language_config = self.provider.language_config(target);
        let handler = self.handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.build_with_context(target, sources, deps, &language_config, &sandbox)
        }))
        .unwrap_or_else(|_| {
            Err(Error::BuildFailure {
                target: target.clone(),
                message: "language handler panicked".to_string(),
            })
        })?;
        Ok(BuildStep::Built(outcome.output_hash))
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self.config.initial_backoff.saturating_mul(1u32 << attempt.min(16));
        scaled.min(self.config.max_backoff)
    }

    fn finish_node(
        &self,
        target: &TargetId,
        status: NodeStatus,
        error: Option<String>,
        injector: &Injector<TargetId>,
        remaining: &AtomicUsize,
        results: &parking_lot::Mutex<Vec<BuildResult>>,
    ) {
        results.lock().push(BuildResult {
            target: target.clone(),
            status,
            error,
        });
        remaining.fetch_sub(1, Ordering::AcqRel);

        let Some(node) = self.graph.node(target) else {
            return;
        };
        for dependent in node.dependents() {
            let Some(dep_node) = self.graph.node(&dependent) else {
                continue;
            };
            if dep_node.decrement_pending_deps() == 0 && dep_node.status() == NodeStatus::Pending {
                injector.push(dependent);
            }
        }
    }

    /// Mark every transitive dependent of a failed node `Failed`, without
    /// ever scheduling them, per `FailureMode::FailFast`.
    fn cascade_failure(
        &self,
        target: &TargetId,
        injector: &Injector<TargetId>,
        remaining: &AtomicUsize,
        results: &parking_lot::Mutex<Vec<BuildResult>>,
    ) {
        let _ = injector;
        let mut stack = match self.graph.node(target) {
            Some(n) => n.dependents(),
            None => return,
        };
        while let Some(current) = stack.pop() {
            let Some(node) = self.graph.node(&current) else {
                continue;
            };
            if !node.cas_status(NodeStatus::Pending, NodeStatus::Failed) {
                continue;
            }
            results.lock().push(BuildResult {
                target: current.clone(),
                status: NodeStatus::Failed,
                error: Some(format!("skipped: dependency {target} failed")),
            });
            remaining.fetch_sub(1, Ordering::AcqRel);
            stack.extend(node.dependents());
        }
    }
}

enum BuildStep {
    Cached,
    Built(ContentHash),
}

/// Canonical `crossbeam-deque` fetch pattern: drain the local queue first,
/// then repeatedly try a batch steal from the global injector or a steal
/// from a sibling until one succeeds or every source reports empty.
fn find_task<T>(local: &Worker<T>, global: &Injector<T>, stealers: &[Stealer<T>]) -> Option<T> {
    local.pop().or_else(|| {
        std::iter::repeat_with(|| {
            global
                .steal_batch_and_pop(local)
                .or_else(|| stealers.iter().map(|s| s.steal()).collect())
        })
        .find(|s| !s.is_retry())
        .and_then(|s| s.success())
    })
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
