// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Two-tier file hashing.
//!
//! `metadataHash` is a cheap `size ‖ mtime` digest (~1 μs); `contentHash` is
//! a cryptographic BLAKE3 digest of the file bytes. `twoTier` only pays the
//! content-hash cost when the metadata tier doesn't match what the caller
//! already has on record. A session-scoped memo table holds both tiers per
//! path until `clear()` is called at the end of a build.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Cheap size+mtime digest. Two files with the same metadata hash are
/// assumed unchanged; this is a false match if contents change without
/// touching mtime (e.g. a clock rollback), which is an accepted tradeoff
/// for the speed gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MetadataHash(u64);

/// Cryptographic BLAKE3 digest of file bytes, hex-encoded for display and
/// storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ContentHash(String);

/// The well-defined hash of a zero-length input.
pub fn empty_content_hash() -> ContentHash {
    ContentHash(blake3::hash(&[]).to_hex().to_string())
}

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Construct from an already-computed hex digest (e.g. read back from a
    /// cache file). Not validated beyond being non-empty.
    pub fn from_hex(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl MetadataHash {
    /// Compute from filesystem metadata: `hash(size ‖ mtime)`.
    #[allow(clippy::expect_used)]
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        let size = meta.len();
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&size.to_le_bytes());
        hasher.update(&mtime.as_secs().to_le_bytes());
        hasher.update(&mtime.subsec_nanos().to_le_bytes());
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();
        Self(u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes")))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Reconstruct from an already-computed value (e.g. read back from a
    /// cache file).
    pub fn from_raw(v: u64) -> Self {
        Self(v)
    }
}

/// Result of a two-tier check against a previously recorded metadata hash.
#[derive(Debug, Clone)]
pub enum TwoTierResult {
    /// Metadata tier matched; content is assumed unchanged and was not
    /// re-hashed.
    Unchanged,
    /// Metadata tier didn't match (or none was on record); content was
    /// hashed and may or may not equal what the caller expected.
    Changed(ContentHash),
}

/// A single memoized entry for a path, holding both tiers computed this
/// session.
#[derive(Debug, Clone)]
struct MemoEntry {
    metadata: MetadataHash,
    content: ContentHash,
}

/// Running counters for observability.
#[derive(Debug, Default)]
pub struct HasherStats {
    pub content_hashes: AtomicU64,
    pub metadata_hits: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
}

impl HasherStats {
    pub fn snapshot(&self) -> HasherStatsSnapshot {
        HasherStatsSnapshot {
            content_hashes: self.content_hashes.load(Ordering::Relaxed),
            metadata_hits: self.metadata_hits.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of `HasherStats` at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HasherStatsSnapshot {
    pub content_hashes: u64,
    pub metadata_hits: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Session-scoped two-tier hasher with per-path memoization.
///
/// One `Mutex`-guarded map backs the memo table, held only for map
/// mutations: the mutex is never held while reading a file or calling
/// `fs::metadata`.
pub struct FastHasher {
    memo: Mutex<std::collections::HashMap<PathBuf, MemoEntry>>,
    stats: HasherStats,
}

impl Default for FastHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl FastHasher {
    pub fn new() -> Self {
        Self {
            memo: Mutex::new(std::collections::HashMap::new()),
            stats: HasherStats::default(),
        }
    }

    /// Compute the metadata hash for a path. Does not touch the memo table.
    pub fn metadata_hash(&self, path: &Path) -> Result<MetadataHash> {
        let meta = fs::metadata(path).map_err(|source| io_err(path, source))?;
        Ok(MetadataHash::from_metadata(&meta))
    }

    /// Compute the content hash for a path, bypassing the memo table. Used
    /// internally by `two_tier` on a miss and available directly for
    /// one-shot callers (e.g. the blob store naming a new blob).
    pub fn content_hash(&self, path: &Path) -> Result<ContentHash> {
        let bytes = fs::read(path).map_err(|source| io_err(path, source))?;
        self.stats.content_hashes.fetch_add(1, Ordering::Relaxed);
        Ok(ContentHash::of_bytes(&bytes))
    }

    /// Two-tier check: if `path`'s current metadata hash matches
    /// `last_metadata`, report `Unchanged` without reading file bytes.
    /// Otherwise compute and return the content hash.
    ///
    /// Also consults and updates the session memo: a memoized entry whose
    /// metadata hash matches the current on-disk metadata is returned
    /// without any filesystem read at all (`cache_hits`); otherwise the
    /// entry is recomputed and the memo updated (`cache_misses`).
    pub fn two_tier(
        &self,
        path: &Path,
        last_metadata: Option<MetadataHash>,
    ) -> Result<TwoTierResult> {
        let current_metadata = self.metadata_hash(path)?;

        if let Some(entry) = self.memo.lock().get(path).cloned()
            && entry.metadata == current_metadata
        {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            if Some(current_metadata) == last_metadata {
                self.stats.metadata_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(TwoTierResult::Unchanged);
            }
            return Ok(TwoTierResult::Changed(entry.content));
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        if Some(current_metadata) == last_metadata {
            self.stats.metadata_hits.fetch_add(1, Ordering::Relaxed);
            // Metadata matches what the caller recorded but we have no
            // session memo; content is assumed unchanged (a false match is
            // possible but accepted for the speed gain).
            return Ok(TwoTierResult::Unchanged);
        }

        let content = self.content_hash(path)?;
        self.memo.lock().insert(
            path.to_path_buf(),
            MemoEntry {
                metadata: current_metadata,
                content: content.clone(),
            },
        );
        Ok(TwoTierResult::Changed(content))
    }

    /// Clear the session memo (end of build).
    pub fn clear(&self) {
        self.memo.lock().clear();
    }

    pub fn stats(&self) -> HasherStatsSnapshot {
        self.stats.snapshot()
    }
}

fn io_err(path: &Path, source: std::io::Error) -> Error {
    if source.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound {
            path: path.to_path_buf(),
        }
    } else {
        Error::IoError {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
#[path = "hash_tests.rs"]
mod tests;
