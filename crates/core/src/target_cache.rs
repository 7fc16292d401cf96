// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Target cache.
//!
//! Tracks, per target, the content+metadata hashes of its sources and the
//! build-hashes of its dependencies at the time the target was last built.
//! `is_cached` revalidates those against the current filesystem state and
//! current dependency entries; `update` records a fresh entry after a
//! successful build; `flush` persists the whole table as a signed envelope.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::codec::{self, Reader, Writer};
use crate::envelope::IntegrityKey;
use crate::error::{Error, Result};
use crate::eviction::{self, EntryInfo, EvictionBounds};
use crate::hash::{ContentHash, FastHasher, MetadataHash, TwoTierResult};
use crate::ids::TargetId;

const MAGIC: [u8; 4] = *b"TCRH";
const VERSION: u8 = 1;

/// One source file's recorded hashes at the time of the last successful
/// build of its owning target.
#[derive(Debug, Clone)]
struct SourceRecord {
    path: PathBuf,
    metadata: MetadataHash,
    content: ContentHash,
}

/// One dependency's recorded build-hash at the time the depending target
/// was last built.
#[derive(Debug, Clone)]
struct DepRecord {
    target: TargetId,
    build_hash: ContentHash,
}

#[derive(Debug, Clone)]
struct TargetEntry {
    target: TargetId,
    sources: Vec<SourceRecord>,
    deps: Vec<DepRecord>,
    output_hash: ContentHash,
    last_access: SystemTime,
}

/// Per-target validity cache.
pub struct TargetCache {
    path: PathBuf,
    key: IntegrityKey,
    hasher: FastHasher,
    entries: Mutex<HashMap<String, TargetEntry>>,
    dirty: Mutex<bool>,
    bounds: EvictionBounds,
}

impl TargetCache {
    /// Open (or create empty) the target cache at `path`.
    pub fn open(path: impl Into<PathBuf>, key: IntegrityKey) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match decode(&bytes, &key) {
                Ok(entries) => entries,
                Err(err) => {
                    // Corruption, expiry, and failed verification are all
                    // treated as a miss: start from an empty table and let
                    // the next flush rewrite the file.
                    tracing::warn!(?err, "target cache unreadable, starting fresh");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => {
                return Err(Error::IoError {
                    path: path.clone(),
                    source,
                });
            }
        };
        Ok(Self {
            path,
            key,
            hasher: FastHasher::new(),
            entries: Mutex::new(entries),
            dirty: Mutex::new(false),
            bounds: EvictionBounds::target_cache_defaults(),
        })
    }

    pub fn with_bounds(mut self, bounds: EvictionBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Whether `target` is still valid given its current `sources` and the
    /// current build-hashes of its `deps`.
    pub fn is_cached(
        &self,
        target: &TargetId,
        sources: &[PathBuf],
        deps: &[(TargetId, ContentHash)],
    ) -> Result<bool> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(target.as_str()) else {
            return Ok(false);
        };

        for source in sources {
            let Some(record) = entry.sources.iter().find(|r| r.path == *source) else {
                return Ok(false);
            };
            if !source.exists() {
                return Ok(false);
            }
            match self.hasher.two_tier(source, Some(record.metadata))? {
                TwoTierResult::Unchanged => {}
                TwoTierResult::Changed(content) => {
                    if content != record.content {
                        return Ok(false);
                    }
                }
            }
        }

        for (dep_target, current_build_hash) in deps {
            let recorded = entry
                .deps
                .iter()
                .find(|d| d.target == *dep_target)
                .map(|d| &d.build_hash);
            match recorded {
                Some(hash) if *hash == *current_build_hash => {}
                _ => return Ok(false),
            }
        }

        entry.last_access = SystemTime::now();
        Ok(true)
    }

    /// Record a fresh entry for `target` after a successful build. Hashes
    /// sources in parallel when there are more than four.
    pub fn update(
        &self,
        target: TargetId,
        sources: &[PathBuf],
        deps: &[(TargetId, ContentHash)],
        output_hash: ContentHash,
    ) -> Result<()> {
        let hash_one = |path: &PathBuf| -> Result<SourceRecord> {
            let metadata = self.hasher.metadata_hash(path)?;
            let content = self.hasher.content_hash(path)?;
            Ok(SourceRecord {
                path: path.clone(),
                metadata,
                content,
            })
        };

        let records: Result<Vec<SourceRecord>> = if sources.len() > 4 {
            sources.par_iter().map(hash_one).collect()
        } else {
            sources.iter().map(hash_one).collect()
        };
        let records = records?;

        let deps = deps
            .iter()
            .map(|(t, h)| DepRecord {
                target: t.clone(),
                build_hash: h.clone(),
            })
            .collect();

        let entry = TargetEntry {
            target: target.clone(),
            sources: records,
            deps,
            output_hash,
            last_access: SystemTime::now(),
        };

        self.entries.lock().insert(target.as_str().to_string(), entry);
        *self.dirty.lock() = true;
        Ok(())
    }

    /// Serialize, sign, and atomically write the table. Runs eviction first
    /// when `run_eviction` is set. No-op when nothing has changed since the
    /// last flush.
    pub fn flush(&self, run_eviction: bool) -> Result<()> {
        if !*self.dirty.lock() {
            return Ok(());
        }

        if run_eviction {
            self.evict();
        }

        let entries = self.entries.lock();
        let payload = encode(&entries);
        drop(entries);

        codec::write_signed_file(&self.path, MAGIC, VERSION, payload, &self.key, SystemTime::now())?;
        *self.dirty.lock() = false;
        Ok(())
    }

    fn evict(&self) {
        let mut entries = self.entries.lock();
        let infos: Vec<EntryInfo<String>> = entries
            .values()
            .map(|e| EntryInfo {
                key: e.target.as_str().to_string(),
                size: entry_size(e),
                last_access: e.last_access,
            })
            .collect();
        let victims = eviction::select_victims(&infos, &self.bounds, SystemTime::now());
        for victim in victims {
            entries.remove(&victim);
        }
    }

    /// The recorded output hash for `target`, if it has a live entry. The
    /// scheduler uses this to feed a just-validated dependency's build hash
    /// to its dependents without re-running the build.
    pub fn output_hash(&self, target: &TargetId) -> Option<ContentHash> {
        self.entries.lock().get(target.as_str()).map(|e| e.output_hash.clone())
    }

    /// Every content hash referenced by a live entry: outputs and source
    /// bytes. Used by the coordinator to compute GC roots.
    pub fn referenced_hashes(&self) -> std::collections::HashSet<ContentHash> {
        let entries = self.entries.lock();
        let mut hashes = std::collections::HashSet::new();
        for entry in entries.values() {
            hashes.insert(entry.output_hash.clone());
            for source in &entry.sources {
                hashes.insert(source.content.clone());
            }
        }
        hashes
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rough serialized size used for eviction accounting: the bound is on
/// "cache entry size", not file bytes on disk, so we approximate with the
/// encoded record length.
fn entry_size(entry: &TargetEntry) -> u64 {
    let mut size = entry.target.as_str().len() + entry.output_hash.as_str().len();
    for s in &entry.sources {
        size += s.path.to_string_lossy().len() + s.content.as_str().len() + 8;
    }
    for d in &entry.deps {
        size += d.target.as_str().len() + d.build_hash.as_str().len();
    }
    size as u64
}

fn encode(entries: &HashMap<String, TargetEntry>) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(entries.len() as u32);
    for entry in entries.values() {
        w.write_string(entry.target.as_str());
        w.write_u64(eviction::to_epoch_secs(entry.last_access));
        w.write_string(entry.output_hash.as_str());

        w.write_u32(entry.sources.len() as u32);
        for s in &entry.sources {
            w.write_string(&s.path.to_string_lossy());
            w.write_u64(s.metadata.value());
            w.write_string(s.content.as_str());
        }

        w.write_u32(entry.deps.len() as u32);
        for d in &entry.deps {
            w.write_string(d.target.as_str());
            w.write_string(d.build_hash.as_str());
        }
    }
    w.into_bytes()
}

fn decode_payload(bytes: &[u8]) -> std::result::Result<HashMap<String, TargetEntry>, crate::codec::CodecError> {
    let mut r = Reader::new(bytes);
    let count = r.read_u32()?;
    let mut entries = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let target_str = r.read_string()?;
        let last_access = eviction::from_epoch_secs(r.read_u64()?);
        let output_hash = ContentHash::from_hex(r.read_string()?);

        let source_count = r.read_u32()?;
        let mut sources = Vec::with_capacity(source_count as usize);
        for _ in 0..source_count {
            let path = PathBuf::from(r.read_string()?);
            let metadata = MetadataHash::from_raw(r.read_u64()?);
            let content = ContentHash::from_hex(r.read_string()?);
            sources.push(SourceRecord {
                path,
                metadata,
                content,
            });
        }

        let dep_count = r.read_u32()?;
        let mut deps = Vec::with_capacity(dep_count as usize);
        for _ in 0..dep_count {
            let target = TargetId::new_unchecked(r.read_string()?);
            let build_hash = ContentHash::from_hex(r.read_string()?);
            deps.push(DepRecord { target, build_hash });
        }

        let target = TargetId::new_unchecked(target_str);
        entries.insert(
            target.as_str().to_string(),
            TargetEntry {
                target,
                sources,
                deps,
                output_hash,
                last_access,
            },
        );
    }
    Ok(entries)
}

fn decode(bytes: &[u8], key: &IntegrityKey) -> Result<HashMap<String, TargetEntry>> {
    let (magic, version, envelope) = codec::decode_envelope(bytes)
        .map_err(|e| e.into_corrupted("target_cache"))?;
    if magic != MAGIC {
        return Err(Error::CacheCorrupted {
            component: "target_cache",
            reason: "bad magic".to_string(),
        });
    }
    if version != VERSION {
        // An unrecognized version byte is treated as a miss; the cache is
        // rewritten on the next flush.
        return Err(Error::CacheCorrupted {
            component: "target_cache",
            reason: format!("unsupported version {version}"),
        });
    }
    if !crate::envelope::verify(&envelope, key) {
        return Err(Error::IntegrityFailed {
            hash: "target_cache envelope".to_string(),
        });
    }
    if crate::envelope::is_expired(&envelope, crate::envelope::DEFAULT_MAX_AGE, SystemTime::now()) {
        return Err(Error::CacheExpired {
            component: "target_cache",
        });
    }
    decode_payload(&envelope.payload).map_err(|e| e.into_corrupted("target_cache"))
}

#[cfg(test)]
#[path = "target_cache_tests.rs"]
mod tests;
