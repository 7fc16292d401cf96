// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Graph cache.
//!
//! Skips re-analysis of build configuration files when none of them have
//! changed: a metadata-hash fast path avoids re-reading file bytes at all,
//! falling back to content hashes only for files whose metadata changed.

use std::path::PathBuf;
use std::time::SystemTime;

use crate::codec::{self, Reader, Writer};
use crate::envelope::IntegrityKey;
use crate::error::{Error, Result};
use crate::graph::{BuildGraph, CycleCheckMode};
use crate::hash::{ContentHash, FastHasher, MetadataHash};
use crate::ids::TargetId;

const MAGIC: [u8; 4] = *b"BGRF";
const VERSION: u8 = 1;

#[derive(Debug, Clone)]
struct ConfigFileRecord {
    path: PathBuf,
    metadata: MetadataHash,
    content: ContentHash,
}

struct CachedGraph {
    mode: CycleCheckMode,
    targets: Vec<TargetId>,
    edges: Vec<(TargetId, TargetId)>,
    configs: Vec<ConfigFileRecord>,
}

/// Persists serialized graph topology keyed by the build config files that
/// produced it.
pub struct GraphCache {
    path: PathBuf,
    key: IntegrityKey,
    hasher: FastHasher,
}

impl GraphCache {
    pub fn open(path: impl Into<PathBuf>, key: IntegrityKey) -> Self {
        Self {
            path: path.into(),
            key,
            hasher: FastHasher::new(),
        }
    }

    /// Attempt to load a cached graph for `config_files`. Returns `None` on
    /// any miss: absent file, failed verification/expiry (the stale file is
    /// removed), or any config file whose content changed.
    pub fn get(&self, config_files: &[PathBuf]) -> Result<Option<BuildGraph>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(Error::IoError {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let cached = match decode(&bytes, &self.key) {
            Ok(c) => c,
            Err(_) => {
                let _ = std::fs::remove_file(&self.path);
                return Ok(None);
            }
        };

        if cached.configs.len() != config_files.len() {
            return Ok(None);
        }

        let mut metadata_all_match = true;
        for record in &cached.configs {
            if !record.path.exists() {
                return Ok(None);
            }
            let current = self.hasher.metadata_hash(&record.path)?;
            if current != record.metadata {
                metadata_all_match = false;
                break;
            }
        }

        if !metadata_all_match {
            for record in &cached.configs {
                let current = self.hasher.content_hash(&record.path)?;
                if current != record.content {
                    let _ = std::fs::remove_file(&self.path);
                    return Ok(None);
                }
            }
        }

        let mut graph = BuildGraph::new(cached.mode);
        for target in cached.targets {
            graph.add_target(target)?;
        }
        for (from, to) in cached.edges {
            graph.add_dependency(&from, &to)?;
        }
        graph.validate()?;
        Ok(Some(graph))
    }

    /// Persist `graph`'s topology keyed by the content+metadata hashes of
    /// `config_files`.
    #[allow(clippy::expect_used)]
    pub fn put(&self, graph: &BuildGraph, config_files: &[PathBuf]) -> Result<()> {
        let mut configs = Vec::with_capacity(config_files.len());
        for path in config_files {
            let metadata = self.hasher.metadata_hash(path)?;
            let content = self.hasher.content_hash(path)?;
            configs.push(ConfigFileRecord {
                path: path.clone(),
                metadata,
                content,
            });
        }

        let targets: Vec<TargetId> = graph.targets().cloned().collect();
        let mut edges = Vec::new();
        for target in graph.targets() {
            let node = graph.node(target).expect("target came from this graph");
            for dep in node.deps() {
                edges.push((target.clone(), dep.clone()));
            }
        }

        let cached = CachedGraph {
            mode: graph.mode(),
            targets,
            edges,
            configs,
        };
        let payload = encode(&cached);
        codec::write_signed_file(&self.path, MAGIC, VERSION, payload, &self.key, SystemTime::now())
    }
}

fn encode(cached: &CachedGraph) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(cached.targets.len() as u32);
    for t in &cached.targets {
        w.write_string(t.as_str());
    }
    w.write_u32(cached.edges.len() as u32);
    for (from, to) in &cached.edges {
        w.write_string(from.as_str());
        w.write_string(to.as_str());
    }
    w.write_u32(cached.configs.len() as u32);
    for c in &cached.configs {
        w.write_string(&c.path.to_string_lossy());
        w.write_u64(c.metadata.value());
        w.write_string(c.content.as_str());
    }
    w.write_u8(match cached.mode {
        CycleCheckMode::Immediate => 0,
        CycleCheckMode::Deferred => 1,
    });
    w.write_u8(1); // validated
    w.into_bytes()
}

fn decode_payload(bytes: &[u8]) -> std::result::Result<CachedGraph, crate::codec::CodecError> {
    let mut r = Reader::new(bytes);

    let target_count = r.read_u32()?;
    let mut targets = Vec::with_capacity(target_count as usize);
    for _ in 0..target_count {
        targets.push(TargetId::new_unchecked(r.read_string()?));
    }

    let edge_count = r.read_u32()?;
    let mut edges = Vec::with_capacity(edge_count as usize);
    for _ in 0..edge_count {
        let from = TargetId::new_unchecked(r.read_string()?);
        let to = TargetId::new_unchecked(r.read_string()?);
        edges.push((from, to));
    }

    let config_count = r.read_u32()?;
    let mut configs = Vec::with_capacity(config_count as usize);
    for _ in 0..config_count {
        let path = PathBuf::from(r.read_string()?);
        let metadata = MetadataHash::from_raw(r.read_u64()?);
        let content = ContentHash::from_hex(r.read_string()?);
        configs.push(ConfigFileRecord {
            path,
            metadata,
            content,
        });
    }

    let mode = match r.read_u8()? {
        0 => CycleCheckMode::Immediate,
        _ => CycleCheckMode::Deferred,
    };
    let _validated = r.read_u8()?;

    Ok(CachedGraph {
        mode,
        targets,
        edges,
        configs,
    })
}

fn decode(bytes: &[u8], key: &IntegrityKey) -> Result<CachedGraph> {
    let (magic, version, envelope) =
        codec::decode_envelope(bytes).map_err(|e| e.into_corrupted("graph_cache"))?;
    if magic != MAGIC {
        return Err(Error::CacheCorrupted {
            component: "graph_cache",
            reason: "bad magic".to_string(),
        });
    }
    if version != VERSION {
        return Err(Error::CacheCorrupted {
            component: "graph_cache",
            reason: format!("unsupported version {version}"),
        });
    }
    if !crate::envelope::verify(&envelope, key) {
        return Err(Error::IntegrityFailed {
            hash: "graph_cache envelope".to_string(),
        });
    }
    if crate::envelope::is_expired(&envelope, crate::envelope::DEFAULT_MAX_AGE, SystemTime::now()) {
        return Err(Error::CacheExpired {
            component: "graph_cache",
        });
    }
    decode_payload(&envelope.payload).map_err(|e| e.into_corrupted("graph_cache"))
}

#[cfg(test)]
#[path = "graph_cache_tests.rs"]
mod tests;
