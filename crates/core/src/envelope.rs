// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Integrity envelope: HMAC-sign/verify with a workspace-keyed secret.
//!
//! The MAC is a BLAKE3 keyed hash over `payload ‖ timestampBE`, computed
//! under a key derived from the workspace root path and a per-install
//! secret. Verification is constant-time; envelopes older than a configured
//! age are treated as expired even when the signature verifies.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default envelope max age (30 days) before it is treated as expired
/// regardless of signature validity.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// 32-byte key derived from the workspace root and a per-install secret.
#[derive(Clone)]
pub struct IntegrityKey([u8; 32]);

impl IntegrityKey {
    /// Derive a key from the workspace root path and an opaque per-install
    /// secret (sourced by the caller — see `workspace::WorkspaceLock` /
    /// `workspace::install_secret`).
    pub fn derive(workspace_root: &Path, secret: &[u8]) -> Self {
        let mut material = workspace_root.to_string_lossy().into_owned().into_bytes();
        material.extend_from_slice(secret);
        let key = blake3::derive_key("buildcore cache integrity envelope v1", &material);
        Self(key)
    }

    #[cfg(test)]
    pub(crate) fn from_raw(key: [u8; 32]) -> Self {
        Self(key)
    }
}

/// A signed, timestamped wrapper around serialized cache data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    pub payload: Vec<u8>,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

fn mac(key: &IntegrityKey, payload: &[u8], timestamp: u64) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_keyed(&key.0);
    hasher.update(payload);
    hasher.update(&timestamp.to_be_bytes());
    *hasher.finalize().as_bytes()
}

/// Sign `payload`, stamping it with `now`.
pub fn sign(payload: Vec<u8>, key: &IntegrityKey, now: SystemTime) -> SignedEnvelope {
    let timestamp = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let signature = mac(key, &payload, timestamp).to_vec();
    SignedEnvelope {
        payload,
        timestamp,
        signature,
    }
}

/// Recompute the MAC and compare it to `envelope.signature` in constant
/// time with respect to the comparison itself (the hash computation is not
/// claimed to be constant-time, only the final comparison).
pub fn verify(envelope: &SignedEnvelope, key: &IntegrityKey) -> bool {
    let expected = mac(key, &envelope.payload, envelope.timestamp);
    constant_time_eq(&expected, &envelope.signature)
}

/// Whether `envelope` is older than `max_age` as of `now`, independent of
/// whether its signature verifies.
pub fn is_expired(envelope: &SignedEnvelope, max_age: Duration, now: SystemTime) -> bool {
    let now_secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let age = now_secs.saturating_sub(envelope.timestamp);
    age > max_age.as_secs()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
