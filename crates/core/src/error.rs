// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by every component.
//!
//! Every surfaced error carries a kind, a human message, the originating
//! component, and contextual key/value pairs, per the propagation policy:
//! `CacheCorrupted`/`CacheExpired` are recovered locally (the cache is
//! cleared and rebuilt transparently); everything else flows to the
//! scheduler, which retries per policy or marks the owning node `Failed`.

use std::path::PathBuf;

use crate::ids::{ActionId, TargetId};

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A dependency edge would close a cycle (Immediate mode) or `validate()`
    /// found one (Deferred mode). Fatal.
    #[error("cycle detected at target {target}")]
    GraphCycle { target: TargetId },

    /// `addTarget` was called with an id already present in the graph. Fatal.
    #[error("duplicate target: {target}")]
    DuplicateTarget { target: TargetId },

    /// An edge referenced a target id not present in the graph. Fatal.
    #[error("target not found: {target}")]
    NodeNotFound { target: TargetId },

    /// Signature or format mismatch on cache load. Recovered locally by
    /// deleting the cache file and starting fresh.
    #[error("cache corrupted: {component}: {reason}")]
    CacheCorrupted {
        component: &'static str,
        reason: String,
    },

    /// Envelope verified but is older than the configured max age. Recovered
    /// locally the same way as `CacheCorrupted`.
    #[error("cache expired: {component}")]
    CacheExpired { component: &'static str },

    /// Computed hash does not match the expected hash for materialized or
    /// downloaded content. Fatal for that artifact; may be retried.
    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Integrity check on a blob failed in a way not covered by
    /// `HashMismatch` (e.g. truncated read). Fatal.
    #[error("integrity failed for blob {hash}")]
    IntegrityFailed { hash: String },

    /// A language handler reported a build failure. Subject to retry policy.
    #[error("build failed for {target}: {message}")]
    BuildFailure { target: TargetId, message: String },

    /// A sandbox invariant was violated (I∩O overlap, write outside O∪T,
    /// network use when hermetic). Fatal.
    #[error("sandbox violation: {reason}")]
    SandboxViolation { reason: String },

    /// An action exceeded its wall-clock deadline. Retryable per policy.
    #[error("timeout for {context}")]
    Timeout { context: String },

    /// An action exceeded a resource limit (memory, FDs, output bytes, ...).
    /// Retryable per policy.
    #[error("resource exceeded: {resource} (limit {limit}, used {used})")]
    ResourceExceeded {
        resource: &'static str,
        limit: u64,
        used: u64,
    },

    /// The build was cancelled by the caller. Propagated, never retried.
    #[error("cancelled")]
    Cancelled,

    /// The determinism verifier found non-reproducible output. Non-fatal
    /// unless strict mode is configured.
    #[error("determinism violation for {action}")]
    DeterminismViolation { action: ActionId },

    /// Filesystem operation failed. Fatal for the operation; the scheduler
    /// may retry it as a transient error.
    #[error("io error at {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A referenced path does not exist.
    #[error("not found: {path}")]
    NotFound { path: PathBuf },

    /// A filesystem operation lacked the necessary permission.
    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Malformed or missing environment-variable configuration.
    #[error("config error: {message}")]
    Config { message: String },

    /// Another process already holds the workspace's advisory lock.
    #[error("workspace locked: {path}")]
    WorkspaceLocked { path: PathBuf },

    /// A bug in this crate, not a user-facing condition.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// How the scheduler should react to an error, independent of its taxonomy
/// kind (several kinds share a severity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Structural or unrecoverable; abort the build after annotating the
    /// causing node.
    Fatal,
    /// Transient; the scheduler may retry per policy.
    Retryable,
    /// Recovered transparently by the component itself (cache rebuilt).
    Recovered,
    /// Does not affect build success/failure on its own.
    Informational,
}

impl From<&Error> for Severity {
    fn from(err: &Error) -> Self {
        match err {
            Error::GraphCycle { .. }
            | Error::DuplicateTarget { .. }
            | Error::NodeNotFound { .. }
            | Error::IntegrityFailed { .. }
            | Error::SandboxViolation { .. }
            | Error::PermissionDenied { .. }
            | Error::Config { .. }
            | Error::WorkspaceLocked { .. }
            | Error::Internal(_) => Severity::Fatal,

            Error::HashMismatch { .. }
            | Error::BuildFailure { .. }
            | Error::Timeout { .. }
            | Error::ResourceExceeded { .. }
            | Error::IoError { .. }
            | Error::NotFound { .. } => Severity::Retryable,

            Error::CacheCorrupted { .. } | Error::CacheExpired { .. } => Severity::Recovered,

            Error::Cancelled => Severity::Fatal,

            Error::DeterminismViolation { .. } => Severity::Informational,
        }
    }
}

/// Error context attached when a node's failure cascades to its dependents.
#[derive(Debug, Clone)]
pub struct CausedBy {
    /// The node whose failure triggered this cascade.
    pub root_target: TargetId,
    /// Human-readable summary of the root error.
    pub root_message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
