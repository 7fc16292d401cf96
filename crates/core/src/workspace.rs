// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace layout, `.gitignore` sentinel, and the advisory workspace lock.
//!
//! `WorkspaceLayout` is pure path computation over the cache root's
//! directory tree. `WorkspaceLock` guards against two builds running
//! concurrently against the same cache root: it is an exclusive-create
//! marker file, not an OS `flock`, matching this crate's avoidance of
//! platform-specific unsafe code.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Paths making up one workspace's cache root.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn gitignore(&self) -> PathBuf {
        self.root.join(".gitignore")
    }

    pub fn target_cache(&self) -> PathBuf {
        self.root.join("cache.bin")
    }

    pub fn graph(&self) -> PathBuf {
        self.root.join("graph.bin")
    }

    pub fn graph_metadata(&self) -> PathBuf {
        self.root.join("graph-metadata.bin")
    }

    pub fn action_cache(&self) -> PathBuf {
        self.root.join("actions").join("actions.bin")
    }

    pub fn blobs(&self) -> PathBuf {
        self.root.join("blobs")
    }

    pub fn source_index(&self) -> PathBuf {
        self.root.join("sources").join("index.bin")
    }

    pub fn incremental(&self) -> PathBuf {
        self.root.join("incremental")
    }

    fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// Create every directory this layout needs and write the `.gitignore`
    /// sentinel (content `"*"`) if it isn't there yet. Idempotent.
    #[allow(clippy::expect_used)]
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|source| io_err(&self.root, source))?;
        fs::create_dir_all(self.action_cache().parent().expect("has parent"))
            .map_err(|source| io_err(&self.root, source))?;
        fs::create_dir_all(self.blobs()).map_err(|source| io_err(&self.root, source))?;
        fs::create_dir_all(self.source_index().parent().expect("has parent"))
            .map_err(|source| io_err(&self.root, source))?;
        fs::create_dir_all(self.incremental()).map_err(|source| io_err(&self.root, source))?;

        let gitignore = self.gitignore();
        if !gitignore.exists() {
            fs::write(&gitignore, b"*").map_err(|source| io_err(&gitignore, source))?;
        }
        Ok(())
    }
}

/// Advisory, exclusive-create lock file guarding a workspace's cache root
/// against concurrent builds. Released on `Drop`.
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Acquire the lock for `layout`. Fails with `Error::WorkspaceLocked` if
    /// another live lock file is already present.
    pub fn acquire(layout: &WorkspaceLayout) -> Result<Self> {
        let path = layout.lock_file();
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                use std::io::Write;
                let _ = write!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::WorkspaceLocked { path })
            }
            Err(source) => Err(io_err(&path, source)),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), ?err, "failed to remove workspace lock file");
        }
    }
}

/// Per-install secret backing `envelope::IntegrityKey::derive`. Generated
/// once per cache root (from the process id, current time, and the root
/// path itself) and persisted so every subsequent build in this workspace
/// re-derives the same key instead of invalidating every cache on restart.
pub fn install_secret(layout: &WorkspaceLayout) -> Result<Vec<u8>> {
    let path = layout.root().join(".install-secret");
    if let Ok(existing) = fs::read(&path) {
        if !existing.is_empty() {
            return Ok(existing);
        }
    }

    let material = format!(
        "{}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos(),
        layout.root().display(),
    );
    let secret = blake3::hash(material.as_bytes()).as_bytes().to_vec();
    fs::write(&path, &secret).map_err(|source| io_err(&path, source))?;
    Ok(secret)
}

fn io_err(path: &Path, source: std::io::Error) -> Error {
    Error::IoError {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
