// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Source repository & tracker.
//!
//! Stores source file bytes content-addressed in the blob store, keeping a
//! `path → hash` index persisted alongside it for O(1) lookup without
//! walking the CAS directory tree. `detect_changes` reuses the two-tier
//! hashing strategy: a metadata match skips a content re-read entirely.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::blob_store::BlobStore;
use crate::codec::{Reader, Writer};
use crate::error::{Error, Result};
use crate::hash::{ContentHash, FastHasher, MetadataHash, TwoTierResult};

/// A stored source file: its workspace-relative path and content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub path: PathBuf,
    pub hash: ContentHash,
}

/// Result of `store_batch`: the individual refs plus the dedup ratio
/// (`1 - unique/total`) across the batch.
#[derive(Debug, Clone)]
pub struct SourceRefSet {
    pub refs: Vec<SourceRef>,
    pub dedup_ratio: f64,
}

/// A source file whose content changed since it was last indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: PathBuf,
    pub old_hash: ContentHash,
    pub new_hash: ContentHash,
}

/// Outcome of `materialize_batch`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub removed: usize,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    metadata: MetadataHash,
    content: ContentHash,
}

/// Content-addressed source store with a persisted path→hash index.
pub struct SourceRepo {
    store: BlobStore,
    index_path: PathBuf,
    index: parking_lot::Mutex<HashMap<PathBuf, IndexEntry>>,
    materialized: parking_lot::Mutex<HashSet<PathBuf>>,
    hasher: FastHasher,
}

impl SourceRepo {
    /// Open a source repo backed by a blob store at `blob_root`, with its
    /// path index persisted at `index_path`.
    pub fn open(blob_root: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Result<Self> {
        let store = BlobStore::open(blob_root)?;
        let index_path = index_path.into();
        let index = match std::fs::read(&index_path) {
            Ok(bytes) => decode_index(&bytes).map_err(|e| e.into_corrupted("source_repo"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => {
                return Err(Error::IoError {
                    path: index_path.clone(),
                    source,
                });
            }
        };
        Ok(Self {
            store,
            index_path,
            index: parking_lot::Mutex::new(index),
            materialized: parking_lot::Mutex::new(HashSet::new()),
            hasher: FastHasher::new(),
        })
    }

    /// Read, hash, and store `path`'s current bytes.
    pub fn store(&self, path: &Path) -> Result<SourceRef> {
        let bytes = std::fs::read(path).map_err(|source| Error::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let hash = self.store.put(&bytes)?;
        self.store.add_ref(&hash);
        let metadata = self.hasher.metadata_hash(path)?;
        self.index.lock().insert(
            path.to_path_buf(),
            IndexEntry {
                metadata,
                content: hash.clone(),
            },
        );
        Ok(SourceRef {
            path: path.to_path_buf(),
            hash,
        })
    }

    /// Store every path in `paths`, in parallel when there are more than
    /// four, and report the batch's dedup ratio.
    pub fn store_batch(&self, paths: &[PathBuf]) -> Result<SourceRefSet> {
        let store_one = |p: &PathBuf| self.store(p);
        let refs: Result<Vec<SourceRef>> = if paths.len() > 4 {
            paths.par_iter().map(store_one).collect()
        } else {
            paths.iter().map(store_one).collect()
        };
        let refs = refs?;

        let total = refs.len();
        let unique = refs
            .iter()
            .map(|r| r.hash.as_str())
            .collect::<HashSet<_>>()
            .len();
        let dedup_ratio = if total == 0 {
            0.0
        } else {
            1.0 - (unique as f64 / total as f64)
        };

        Ok(SourceRefSet { refs, dedup_ratio })
    }

    /// Fetch the bytes for a previously stored hash.
    pub fn fetch(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        self.store.get(hash)
    }

    /// Write the blob for `hash` to `dst_path`, creating parent directories
    /// as needed. Returns `true` if this created a new file, `false` if it
    /// overwrote an existing one with different content, and leaves the
    /// file untouched (still returns `Ok`) when the existing content
    /// already matches.
    pub fn materialize(&self, hash: &ContentHash, dst_path: &Path) -> Result<bool> {
        let bytes = self.fetch(hash)?;
        if dst_path.exists() {
            let existing = std::fs::read(dst_path).map_err(|source| Error::IoError {
                path: dst_path.to_path_buf(),
                source,
            })?;
            if ContentHash::of_bytes(&existing) == *hash {
                return Ok(false);
            }
        }
        let created = !dst_path.exists();
        crate::codec::write_atomic(dst_path, &bytes).map_err(|source| Error::IoError {
            path: dst_path.to_path_buf(),
            source,
        })?;
        Ok(created)
    }

    /// Materialize every ref in `set` under `dest_root`, removing any file
    /// materialized by a previous call that's absent from this set.
    pub fn materialize_batch(&self, set: &SourceRefSet, dest_root: &Path) -> Result<MaterializeReport> {
        let mut report = MaterializeReport::default();
        let mut current_paths = HashSet::new();

        for source_ref in &set.refs {
            let dst = dest_root.join(&source_ref.path);
            current_paths.insert(dst.clone());

            let existed = dst.exists();
            let unchanged = existed
                && std::fs::read(&dst)
                    .ok()
                    .map(|b| ContentHash::of_bytes(&b) == source_ref.hash)
                    .unwrap_or(false);

            if unchanged {
                report.skipped += 1;
                continue;
            }

            let bytes = self.fetch(&source_ref.hash)?;
            crate::codec::write_atomic(&dst, &bytes).map_err(|source| Error::IoError {
                path: dst.clone(),
                source,
            })?;
            if existed {
                report.updated += 1;
            } else {
                report.created += 1;
            }
        }

        let mut materialized = self.materialized.lock();
        for stale in materialized.iter().filter(|p| !current_paths.contains(*p)) {
            if std::fs::remove_file(stale).is_ok() {
                report.removed += 1;
            }
        }
        *materialized = current_paths;

        Ok(report)
    }

    /// For each path with an existing index entry, recompute its hash via
    /// the two-tier strategy and report it if changed. Paths with no prior
    /// entry are not reported (there is no "old" hash to compare against).
    pub fn detect_changes(&self, paths: &[PathBuf]) -> Result<Vec<ChangedFile>> {
        let mut changed = Vec::new();
        let mut index = self.index.lock();

        for path in paths {
            let Some(entry) = index.get(path).cloned() else {
                continue;
            };
            if !path.exists() {
                continue;
            }
            match self.hasher.two_tier(path, Some(entry.metadata))? {
                TwoTierResult::Unchanged => {}
                TwoTierResult::Changed(new_hash) => {
                    if new_hash != entry.content {
                        changed.push(ChangedFile {
                            path: path.clone(),
                            old_hash: entry.content.clone(),
                            new_hash: new_hash.clone(),
                        });
                    }
                    let metadata = self.hasher.metadata_hash(path)?;
                    index.insert(
                        path.clone(),
                        IndexEntry {
                            metadata,
                            content: new_hash,
                        },
                    );
                }
            }
        }

        Ok(changed)
    }

    /// Persist the path→hash index to disk (`MetadataSidecar` framing,
    /// left unsigned since it is a derived lookup cache and not a trust
    /// boundary the way the target/action caches are).
    pub fn flush_index(&self) -> Result<()> {
        let index = self.index.lock();
        let bytes = encode_index(&index);
        crate::codec::write_atomic(&self.index_path, &bytes).map_err(|source| Error::IoError {
            path: self.index_path.clone(),
            source,
        })
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.store
    }

    /// Every content hash tracked by the path index. Used by the
    /// coordinator to compute GC roots.
    pub fn referenced_hashes(&self) -> HashSet<ContentHash> {
        self.index.lock().values().map(|e| e.content.clone()).collect()
    }
}

fn encode_index(index: &HashMap<PathBuf, IndexEntry>) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u8(1); // sidecar version
    w.write_u32(index.len() as u32);
    for (path, entry) in index {
        w.write_string(&path.to_string_lossy());
        w.write_string(&format!("{:016x}:{}", entry.metadata.value(), entry.content));
    }
    w.into_bytes()
}

fn decode_index(bytes: &[u8]) -> std::result::Result<HashMap<PathBuf, IndexEntry>, crate::codec::CodecError> {
    let mut r = Reader::new(bytes);
    let _version = r.read_u8()?;
    let count = r.read_u32()?;
    let mut index = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let path = PathBuf::from(r.read_string()?);
        let value = r.read_string()?;
        let (metadata_hex, content_hex) = value.split_once(':').ok_or(crate::codec::CodecError::InvalidUtf8)?;
        let metadata_raw = u64::from_str_radix(metadata_hex, 16).map_err(|_| crate::codec::CodecError::InvalidUtf8)?;
        index.insert(
            path,
            IndexEntry {
                metadata: MetadataHash::from_raw(metadata_raw),
                content: ContentHash::from_hex(content_hex.to_string()),
            },
        );
    }
    Ok(index)
}

#[cfg(test)]
#[path = "source_repo_tests.rs"]
mod tests;
