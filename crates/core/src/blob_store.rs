// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Content-addressed blob store.
//!
//! Blobs are sharded on disk by the first two hex characters of their
//! BLAKE3 hash (`<root>/<hh>/<fullhash>`), written via temp-file-then-rename
//! for crash safety, and reference-counted so the garbage collector can
//! reclaim unreferenced content at `runGC()` time.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::hash::ContentHash;

/// In-memory refcount table, guarded by a single mutex, never held across
/// file I/O.
struct RefTable {
    counts: std::collections::HashMap<String, u64>,
}

/// Byte-addressable, deduplicating, refcounted blob store.
pub struct BlobStore {
    root: PathBuf,
    refs: Mutex<RefTable>,
}

impl BlobStore {
    /// Open (creating if absent) a blob store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| io_err(&root, source))?;
        Ok(Self {
            root,
            refs: Mutex::new(RefTable {
                counts: std::collections::HashMap::new(),
            }),
        })
    }

    fn shard_path(&self, hash: &str) -> PathBuf {
        let shard = &hash[..2.min(hash.len())];
        self.root.join(shard).join(hash)
    }

    /// Store `bytes`, returning its content hash. Idempotent: storing the
    /// same bytes twice yields the same hash and leaves one physical blob.
    /// Concurrent `put` of identical bytes from any number of callers is
    /// safe: the last writer wins, writing identical content.
    #[allow(clippy::expect_used)]
    pub fn put(&self, bytes: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::of_bytes(bytes);
        let path = self.shard_path(hash.as_str());

        if !path.exists() {
            let dir = path.parent().expect("shard path always has a parent");
            fs::create_dir_all(dir).map_err(|source| io_err(dir, source))?;
            let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
            fs::write(&tmp, bytes).map_err(|source| io_err(&tmp, source))?;
            fs::rename(&tmp, &path).map_err(|source| io_err(&path, source))?;
            tracing::debug!(hash = %hash, bytes = bytes.len(), "blob stored");
        }

        Ok(hash)
    }

    /// Fetch the bytes for `hash`.
    pub fn get(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        let path = self.shard_path(hash.as_str());
        fs::read(&path).map_err(|source| io_err(&path, source))
    }

    /// Whether a blob for `hash` exists on disk.
    pub fn has(&self, hash: &ContentHash) -> bool {
        self.shard_path(hash.as_str()).exists()
    }

    /// Increment the live reference count for `hash`.
    pub fn add_ref(&self, hash: &ContentHash) {
        let mut refs = self.refs.lock();
        *refs.counts.entry(hash.as_str().to_string()).or_insert(0) += 1;
    }

    /// Decrement the live reference count for `hash`. Returns `true` when
    /// the count reaches zero.
    pub fn remove_ref(&self, hash: &ContentHash) -> bool {
        let mut refs = self.refs.lock();
        match refs.counts.get_mut(hash.as_str()) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                refs.counts.remove(hash.as_str());
                true
            }
            None => true,
        }
    }

    /// Delete the blob for `hash`. No-op (returns `false`) if the refcount
    /// is still positive.
    pub fn delete(&self, hash: &ContentHash) -> Result<bool> {
        {
            let refs = self.refs.lock();
            if refs.counts.get(hash.as_str()).copied().unwrap_or(0) > 0 {
                return Ok(false);
            }
        }
        let path = self.shard_path(hash.as_str());
        if path.exists() {
            fs::remove_file(&path).map_err(|source| io_err(&path, source))?;
        }
        Ok(true)
    }

    /// Mark-from-roots and sweep: delete every on-disk blob whose hash is
    /// not in `roots` and whose refcount is zero. Returns the number of
    /// blobs removed and the bytes reclaimed.
    pub fn gc(&self, roots: &std::collections::HashSet<ContentHash>) -> Result<GcReport> {
        let mut removed = 0usize;
        let mut bytes_reclaimed = 0u64;

        let Ok(shards) = fs::read_dir(&self.root) else {
            return Ok(GcReport {
                removed,
                bytes_reclaimed,
            });
        };

        for shard in shards.flatten() {
            if !shard.path().is_dir() {
                continue;
            }
            let Ok(entries) = fs::read_dir(shard.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let hash = ContentHash::from_hex(name.to_string());
                if roots.contains(&hash) {
                    continue;
                }
                let referenced = {
                    let refs = self.refs.lock();
                    refs.counts.get(hash.as_str()).copied().unwrap_or(0) > 0
                };
                if referenced {
                    continue;
                }
                if let Ok(meta) = entry.metadata() {
                    bytes_reclaimed += meta.len();
                }
                if fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }

        tracing::info!(removed, bytes_reclaimed, "blob store GC complete");
        Ok(GcReport {
            removed,
            bytes_reclaimed,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Result of a `gc()` sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub removed: usize,
    pub bytes_reclaimed: u64,
}

fn io_err(path: &Path, source: std::io::Error) -> Error {
    Error::IoError {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
#[path = "blob_store_tests.rs"]
mod tests;
