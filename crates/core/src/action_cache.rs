// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Action cache.
//!
//! Same shape as the target cache but keyed by `ActionId`, and additionally
//! requires that every declared output still exists on disk and that the
//! supplied metadata (compiler flags, env subset, toolchain version, ...)
//! matches byte-for-byte what was recorded. `execution_hash` is a
//! deterministic hash over the metadata map, sorted by key, so that the
//! same inputs built with different flags land in different entries.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::SystemTime;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::codec::{self, Reader, Writer};
use crate::envelope::IntegrityKey;
use crate::error::{Error, Result};
use crate::eviction::{self, EntryInfo, EvictionBounds};
use crate::hash::{ContentHash, FastHasher, MetadataHash, TwoTierResult};
use crate::ids::ActionId;

const MAGIC: [u8; 4] = *b"ACRH";
const VERSION: u8 = 1;

#[derive(Debug, Clone)]
struct InputRecord {
    path: PathBuf,
    metadata: MetadataHash,
    content: ContentHash,
}

#[derive(Debug, Clone)]
struct ActionEntry {
    action: ActionId,
    inputs: Vec<InputRecord>,
    outputs: Vec<PathBuf>,
    metadata: BTreeMap<String, String>,
    execution_hash: ContentHash,
    last_access: SystemTime,
}

/// Deterministic hash over a metadata map, sorted by key, so identical
/// inputs built under different flags/toolchains occupy different entries.
pub fn execution_hash(metadata: &BTreeMap<String, String>) -> ContentHash {
    let mut w = Writer::new();
    w.write_u32(metadata.len() as u32);
    for (k, v) in metadata {
        w.write_string(k);
        w.write_string(v);
    }
    ContentHash::of_bytes(&w.into_bytes())
}

/// Per-action validity cache.
pub struct ActionCache {
    path: PathBuf,
    key: IntegrityKey,
    hasher: FastHasher,
    entries: Mutex<HashMap<String, ActionEntry>>,
    dirty: Mutex<bool>,
    bounds: EvictionBounds,
}

impl ActionCache {
    pub fn open(path: impl Into<PathBuf>, key: IntegrityKey) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match decode(&bytes, &key) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(?err, "action cache unreadable, starting fresh");
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
            bounds: EvictionBounds::action_cache_defaults(),
        })
    }

    pub fn with_bounds(mut self, bounds: EvictionBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Whether `action` is still valid: inputs unchanged, all declared
    /// outputs present, and `metadata` matches the recorded execution hash.
    pub fn is_cached(
        &self,
        action: &ActionId,
        inputs: &[PathBuf],
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&action.canonical()) else {
            return Ok(false);
        };

        if execution_hash(metadata) != entry.execution_hash {
            return Ok(false);
        }

        for output in &entry.outputs {
            if !output.exists() {
                return Ok(false);
            }
        }

        for input in inputs {
            let Some(record) = entry.inputs.iter().find(|r| r.path == *input) else {
                return Ok(false);
            };
            if !input.exists() {
                return Ok(false);
            }
            match self.hasher.two_tier(input, Some(record.metadata))? {
                TwoTierResult::Unchanged => {}
                TwoTierResult::Changed(content) => {
                    if content != record.content {
                        return Ok(false);
                    }
                }
            }
        }

        entry.last_access = SystemTime::now();
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        action: ActionId,
        inputs: &[PathBuf],
        outputs: Vec<PathBuf>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let hash_one = |path: &PathBuf| -> Result<InputRecord> {
            let metadata = self.hasher.metadata_hash(path)?;
            let content = self.hasher.content_hash(path)?;
            Ok(InputRecord {
                path: path.clone(),
                metadata,
                content,
            })
        };

        let records: Result<Vec<InputRecord>> = if inputs.len() > 4 {
            inputs.par_iter().map(hash_one).collect()
        } else {
            inputs.iter().map(hash_one).collect()
        };
        let records = records?;

        let execution_hash = execution_hash(&metadata);
        let entry = ActionEntry {
            action: action.clone(),
            inputs: records,
            outputs,
            metadata,
            execution_hash,
            last_access: SystemTime::now(),
        };

        self.entries.lock().insert(action.canonical(), entry);
        *self.dirty.lock() = true;
        Ok(())
    }

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
                key: e.action.canonical(),
                size: entry_size(e),
                last_access: e.last_access,
            })
            .collect();
        let victims = eviction::select_victims(&infos, &self.bounds, SystemTime::now());
        for victim in victims {
            entries.remove(&victim);
        }
    }

    /// Every content hash referenced by a live entry: inputs. Action
    /// outputs are tracked by path on disk, not by content hash, so they
    /// are not part of the blob-store GC root set.
    pub fn referenced_hashes(&self) -> std::collections::HashSet<ContentHash> {
        let entries = self.entries.lock();
        let mut hashes = std::collections::HashSet::new();
        for entry in entries.values() {
            for input in &entry.inputs {
                hashes.insert(input.content.clone());
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

fn entry_size(entry: &ActionEntry) -> u64 {
    let mut size = entry.action.canonical().len();
    for i in &entry.inputs {
        size += i.path.to_string_lossy().len() + i.content.as_str().len() + 8;
    }
    for o in &entry.outputs {
        size += o.to_string_lossy().len();
    }
    for (k, v) in &entry.metadata {
        size += k.len() + v.len();
    }
    size as u64
}

fn encode(entries: &HashMap<String, ActionEntry>) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(entries.len() as u32);
    for entry in entries.values() {
        w.write_string(&entry.action.canonical());
        w.write_string(entry.action.target.as_str());
        w.write_string(&entry.action.action_type.to_string());
        w.write_string(entry.action.sub_id.as_deref().unwrap_or(""));
        w.write_string(&entry.action.input_hash);
        w.write_u64(eviction::to_epoch_secs(entry.last_access));
        w.write_string(entry.execution_hash.as_str());

        w.write_u32(entry.inputs.len() as u32);
        for i in &entry.inputs {
            w.write_string(&i.path.to_string_lossy());
            w.write_u64(i.metadata.value());
            w.write_string(i.content.as_str());
        }

        w.write_u32(entry.outputs.len() as u32);
        for o in &entry.outputs {
            w.write_string(&o.to_string_lossy());
        }

        w.write_u32(entry.metadata.len() as u32);
        for (k, v) in &entry.metadata {
            w.write_string(k);
            w.write_string(v);
        }
    }
    w.into_bytes()
}

fn decode_payload(bytes: &[u8]) -> std::result::Result<HashMap<String, ActionEntry>, crate::codec::CodecError> {
    use crate::ids::{ActionType, TargetId};

    let mut r = Reader::new(bytes);
    let count = r.read_u32()?;
    let mut entries = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let canonical = r.read_string()?;
        let target = TargetId::new_unchecked(r.read_string()?);
        let action_type_str = r.read_string()?;
        let action_type = ActionType::parse(&action_type_str).unwrap_or(ActionType::Custom);
        let sub_raw = r.read_string()?;
        let sub_id = if sub_raw.is_empty() { None } else { Some(sub_raw) };
        let input_hash = r.read_string()?;
        let last_access = eviction::from_epoch_secs(r.read_u64()?);
        let exec_hash = ContentHash::from_hex(r.read_string()?);

        let input_count = r.read_u32()?;
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            let path = PathBuf::from(r.read_string()?);
            let metadata = MetadataHash::from_raw(r.read_u64()?);
            let content = ContentHash::from_hex(r.read_string()?);
            inputs.push(InputRecord {
                path,
                metadata,
                content,
            });
        }

        let output_count = r.read_u32()?;
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            outputs.push(PathBuf::from(r.read_string()?));
        }

        let metadata_count = r.read_u32()?;
        let mut metadata = BTreeMap::new();
        for _ in 0..metadata_count {
            let k = r.read_string()?;
            let v = r.read_string()?;
            metadata.insert(k, v);
        }

        let action = ActionId::new(target, action_type, sub_id, input_hash);
        entries.insert(
            canonical,
            ActionEntry {
                action,
                inputs,
                outputs,
                metadata,
                execution_hash: exec_hash,
                last_access,
            },
        );
    }
    Ok(entries)
}

fn decode(bytes: &[u8], key: &IntegrityKey) -> Result<HashMap<String, ActionEntry>> {
    let (magic, version, envelope) =
        codec::decode_envelope(bytes).map_err(|e| e.into_corrupted("action_cache"))?;
    if magic != MAGIC {
        return Err(Error::CacheCorrupted {
            component: "action_cache",
            reason: "bad magic".to_string(),
        });
    }
    if version != VERSION {
        return Err(Error::CacheCorrupted {
            component: "action_cache",
            reason: format!("unsupported version {version}"),
        });
    }
    if !crate::envelope::verify(&envelope, key) {
        return Err(Error::IntegrityFailed {
            hash: "action_cache envelope".to_string(),
        });
    }
    if crate::envelope::is_expired(&envelope, crate::envelope::DEFAULT_MAX_AGE, SystemTime::now()) {
        return Err(Error::CacheExpired {
            component: "action_cache",
        });
    }
    decode_payload(&envelope.payload).map_err(|e| e.into_corrupted("action_cache"))
}

#[cfg(test)]
#[path = "action_cache_tests.rs"]
mod tests;
