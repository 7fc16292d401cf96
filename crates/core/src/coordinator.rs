// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Cache coordinator.
//!
//! Single façade over the target, action, and source caches. Emits
//! observer events non-blockingly and tracks aggregate hit-rate stats;
//! `flush`/`close` persist every layer in a fixed order (target, action,
//! source repo) so a crash mid-flush never leaves the source index ahead
//! of caches that reference it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::action_cache::ActionCache;
use crate::blob_store::GcReport;
use crate::env::WorkspaceConfig;
use crate::envelope::IntegrityKey;
use crate::error::Result;
use crate::events::{Event, EventPublisher};
use crate::hash::ContentHash;
use crate::ids::{ActionId, TargetId};
use crate::source_repo::{ChangedFile, MaterializeReport, SourceRef, SourceRefSet, SourceRepo};
use crate::target_cache::TargetCache;
use crate::workspace::{WorkspaceLayout, WorkspaceLock};

/// One request in a `batch_validate` call.
pub enum ValidationRequest {
    Target {
        target: TargetId,
        sources: Vec<PathBuf>,
        deps: Vec<(TargetId, ContentHash)>,
    },
    Action {
        action: ActionId,
        inputs: Vec<PathBuf>,
        metadata: BTreeMap<String, String>,
    },
}

impl ValidationRequest {
    fn key(&self) -> String {
        match self {
            ValidationRequest::Target { target, .. } => target.as_str().to_string(),
            ValidationRequest::Action { action, .. } => action.canonical(),
        }
    }
}

/// Result of `batch_validate`: per-request verdicts plus the aggregate hit
/// rate across the batch.
#[derive(Debug, Clone)]
pub struct BatchValidation {
    pub results: HashMap<String, bool>,
    pub hit_rate: f64,
}

/// Running hit/miss counters for observability.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    pub target_hits: AtomicU64,
    pub target_misses: AtomicU64,
    pub action_hits: AtomicU64,
    pub action_misses: AtomicU64,
    pub gc_runs: AtomicU64,
}

impl CoordinatorStats {
    pub fn snapshot(&self) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            target_hits: self.target_hits.load(Ordering::Relaxed),
            target_misses: self.target_misses.load(Ordering::Relaxed),
            action_hits: self.action_hits.load(Ordering::Relaxed),
            action_misses: self.action_misses.load(Ordering::Relaxed),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of `CoordinatorStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoordinatorStatsSnapshot {
    pub target_hits: u64,
    pub target_misses: u64,
    pub action_hits: u64,
    pub action_misses: u64,
    pub gc_runs: u64,
}

impl CoordinatorStatsSnapshot {
    /// Overall hit rate across target and action lookups, `0.0` when there
    /// have been no lookups at all.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.target_hits + self.action_hits;
        let total = hits + self.target_misses + self.action_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Unifies the target, action, and source caches behind one API.
pub struct CacheCoordinator {
    target_cache: TargetCache,
    action_cache: ActionCache,
    source_repo: SourceRepo,
    events: EventPublisher,
    stats: CoordinatorStats,
    closed: AtomicBool,
    /// Held only when opened via `open()`; `None` for `new()`-assembled
    /// coordinators (tests that bring their own already-open layers).
    /// Interior mutability lets `close()` release it without a `&mut self`.
    lock: parking_lot::Mutex<Option<WorkspaceLock>>,
}

impl CacheCoordinator {
    pub fn new(
        target_cache: TargetCache,
        action_cache: ActionCache,
        source_repo: SourceRepo,
        events: EventPublisher,
    ) -> Self {
        Self {
            target_cache,
            action_cache,
            source_repo,
            events,
            stats: CoordinatorStats::default(),
            closed: AtomicBool::new(false),
            lock: parking_lot::Mutex::new(None),
        }
    }

    /// Open every cache layer rooted at `layout`: initializes the
    /// directory tree and `.gitignore` sentinel, acquires the advisory
    /// workspace lock, derives the integrity key from the per-install
    /// secret, and opens the target/action/source caches with `config`'s
    /// eviction bounds. This is the entry point real callers use; `new`
    /// stays available for assembling already-open layers (tests, or a
    /// caller that manages its own lock).
    pub fn open(layout: &WorkspaceLayout, config: WorkspaceConfig, events: EventPublisher) -> Result<Self> {
        layout.init()?;
        let lock = WorkspaceLock::acquire(layout)?;
        let secret = crate::workspace::install_secret(layout)?;
        let key = IntegrityKey::derive(layout.root(), &secret);

        let target_cache =
            TargetCache::open(layout.target_cache(), key.clone())?.with_bounds(config.target_cache_bounds);
        let action_cache =
            ActionCache::open(layout.action_cache(), key)?.with_bounds(config.action_cache_bounds);
        let source_repo = SourceRepo::open(layout.blobs(), layout.source_index())?;

        Ok(Self {
            target_cache,
            action_cache,
            source_repo,
            events,
            stats: CoordinatorStats::default(),
            closed: AtomicBool::new(false),
            lock: parking_lot::Mutex::new(Some(lock)),
        })
    }

    pub fn is_cached(
        &self,
        target: &TargetId,
        sources: &[PathBuf],
        deps: &[(TargetId, ContentHash)],
    ) -> Result<bool> {
        let cached = self.target_cache.is_cached(target, sources, deps)?;
        if cached {
            self.stats.target_hits.fetch_add(1, Ordering::Relaxed);
            self.events.publish(Event::CacheHit {
                target: target.clone(),
            });
        } else {
            self.stats.target_misses.fetch_add(1, Ordering::Relaxed);
            self.events.publish(Event::CacheMiss {
                target: target.clone(),
            });
        }
        Ok(cached)
    }

    pub fn is_action_cached(
        &self,
        action: &ActionId,
        inputs: &[PathBuf],
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let cached = self.action_cache.is_cached(action, inputs, metadata)?;
        if cached {
            self.stats.action_hits.fetch_add(1, Ordering::Relaxed);
            self.events.publish(Event::ActionHit {
                action: action.clone(),
            });
        } else {
            self.stats.action_misses.fetch_add(1, Ordering::Relaxed);
            self.events.publish(Event::ActionMiss {
                action: action.clone(),
            });
        }
        Ok(cached)
    }

    pub fn update(
        &self,
        target: TargetId,
        sources: &[PathBuf],
        deps: &[(TargetId, ContentHash)],
        output_hash: ContentHash,
    ) -> Result<()> {
        self.events.publish(Event::CacheUpdate {
            target: target.clone(),
        });
        self.target_cache.update(target, sources, deps, output_hash)
    }

    /// The recorded output hash for `target`, if cached. See
    /// `TargetCache::output_hash`.
    pub fn output_hash(&self, target: &TargetId) -> Option<ContentHash> {
        self.target_cache.output_hash(target)
    }

    pub fn record_action(
        &self,
        action: ActionId,
        inputs: &[PathBuf],
        outputs: Vec<PathBuf>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        self.action_cache.record(action, inputs, outputs, metadata)
    }

    /// Run every request in `requests` through the work-stealing parallel
    /// map, short-circuiting the rayon setup for a single-request batch.
    pub fn batch_validate(&self, requests: Vec<ValidationRequest>) -> BatchValidation {
        let outcomes = if requests.len() == 1 {
            requests
                .into_iter()
                .map(|r| self.validate_one(r))
                .collect::<Vec<_>>()
        } else {
            crate::parallel::map(&requests, |r| Ok(self.validate_one_ref(r)))
                .into_iter()
                .map(|r| r.unwrap_or((String::new(), false)))
                .collect()
        };

        let mut results = HashMap::with_capacity(outcomes.len());
        let mut hits = 0usize;
        for (key, cached) in &outcomes {
            results.insert(key.clone(), *cached);
            if *cached {
                hits += 1;
            }
        }
        let hit_rate = if outcomes.is_empty() {
            0.0
        } else {
            hits as f64 / outcomes.len() as f64
        };

        BatchValidation { results, hit_rate }
    }

    fn validate_one(&self, request: ValidationRequest) -> (String, bool) {
        let key = request.key();
        let cached = self.validate_one_ref(&request);
        (key, cached)
    }

    fn validate_one_ref(&self, request: &ValidationRequest) -> bool {
        match request {
            ValidationRequest::Target {
                target,
                sources,
                deps,
            } => self
                .is_cached(target, sources, deps)
                .unwrap_or(false),
            ValidationRequest::Action {
                action,
                inputs,
                metadata,
            } => self
                .is_action_cached(action, inputs, metadata)
                .unwrap_or(false),
        }
    }

    pub fn store_sources(&self, paths: &[PathBuf]) -> Result<SourceRefSet> {
        self.source_repo.store_batch(paths)
    }

    pub fn materialize_sources(&self, set: &SourceRefSet, dest_root: &std::path::Path) -> Result<MaterializeReport> {
        self.source_repo.materialize_batch(set, dest_root)
    }

    pub fn detect_source_changes(&self, paths: &[PathBuf]) -> Result<Vec<ChangedFile>> {
        self.source_repo.detect_changes(paths)
    }

    pub fn store_source(&self, path: &std::path::Path) -> Result<SourceRef> {
        self.source_repo.store(path)
    }

    /// Mark-and-sweep the shared blob store using the union of every
    /// content hash still referenced by a live target/action/source entry
    /// as GC roots.
    pub fn run_gc(&self) -> Result<GcReport> {
        let mut roots: HashSet<ContentHash> = HashSet::new();
        roots.extend(self.target_cache.referenced_hashes());
        roots.extend(self.action_cache.referenced_hashes());
        roots.extend(self.source_repo.referenced_hashes());

        let report = self.source_repo.blob_store().gc(&roots)?;
        self.stats.gc_runs.fetch_add(1, Ordering::Relaxed);
        self.events.publish(Event::GcComplete {
            removed: report.removed,
            bytes_reclaimed: report.bytes_reclaimed,
        });
        Ok(report)
    }

    /// Persist every layer, in order: target cache, action cache, source
    /// index. Idempotent — a no-op layer (nothing dirty) is cheap.
    pub fn flush(&self, run_eviction: bool) -> Result<()> {
        self.target_cache.flush(run_eviction)?;
        self.action_cache.flush(run_eviction)?;
        self.source_repo.flush_index()?;
        Ok(())
    }

    /// Explicit, durable shutdown. Required for durability guarantees;
    /// `Drop` only makes a best-effort attempt and swallows errors.
    pub fn close(&self) -> Result<()> {
        self.flush(true)?;
        self.closed.store(true, Ordering::Release);
        self.lock.lock().take();
        Ok(())
    }

    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for CacheCoordinator {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Err(err) = self.flush(false) {
            tracing::warn!(?err, "best-effort flush on drop failed; call close() explicitly");
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
