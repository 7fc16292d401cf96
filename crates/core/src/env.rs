// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Environment-variable configuration knobs.
//!
//! One `WorkspaceConfig` is parsed once, at coordinator construction, from
//! the process environment, since this crate owns no CLI or file-format
//! surface of its own. A present-but-malformed value is an `Error::Config`,
//! never a panic.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::eviction::EvictionBounds;

const CACHE_MAX_SIZE: &str = "BUILDER_CACHE_MAX_SIZE";
const CACHE_MAX_ENTRIES: &str = "BUILDER_CACHE_MAX_ENTRIES";
const CACHE_MAX_AGE_DAYS: &str = "BUILDER_CACHE_MAX_AGE_DAYS";
const ACTION_CACHE_MAX_SIZE: &str = "BUILDER_ACTION_CACHE_MAX_SIZE";
const ACTION_CACHE_MAX_ENTRIES: &str = "BUILDER_ACTION_CACHE_MAX_ENTRIES";
const ACTION_CACHE_MAX_AGE_DAYS: &str = "BUILDER_ACTION_CACHE_MAX_AGE_DAYS";
const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// Parsed configuration for one workspace, covering every env-var knob this
/// crate reads. Sandbox resource limits are a separate concern, owned
/// by `sandbox::ResourceLimits::hermetic_defaults()`.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub target_cache_bounds: EvictionBounds,
    pub action_cache_bounds: EvictionBounds,
    /// Consumed by the determinism verifier to stabilize embedded
    /// timestamps; `None` means "use the wall clock" (the verifier's own
    /// concern, not this module's).
    pub source_date_epoch: Option<u64>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            target_cache_bounds: EvictionBounds::target_cache_defaults(),
            action_cache_bounds: EvictionBounds::action_cache_defaults(),
            source_date_epoch: None,
        }
    }
}

impl WorkspaceConfig {
    /// Parse from the real process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse from an arbitrary key lookup, so tests can supply an
    /// in-memory environment instead of mutating the real process one.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup(CACHE_MAX_SIZE) {
            config.target_cache_bounds.max_bytes = parse_u64(CACHE_MAX_SIZE, &v)?;
        }
        if let Some(v) = lookup(CACHE_MAX_ENTRIES) {
            config.target_cache_bounds.max_entries = parse_usize(CACHE_MAX_ENTRIES, &v)?;
        }
        if let Some(v) = lookup(CACHE_MAX_AGE_DAYS) {
            config.target_cache_bounds.max_age = parse_days(CACHE_MAX_AGE_DAYS, &v)?;
        }

        if let Some(v) = lookup(ACTION_CACHE_MAX_SIZE) {
            config.action_cache_bounds.max_bytes = parse_u64(ACTION_CACHE_MAX_SIZE, &v)?;
        }
        if let Some(v) = lookup(ACTION_CACHE_MAX_ENTRIES) {
            config.action_cache_bounds.max_entries = parse_usize(ACTION_CACHE_MAX_ENTRIES, &v)?;
        }
        if let Some(v) = lookup(ACTION_CACHE_MAX_AGE_DAYS) {
            config.action_cache_bounds.max_age = parse_days(ACTION_CACHE_MAX_AGE_DAYS, &v)?;
        }

        if let Some(v) = lookup(SOURCE_DATE_EPOCH) {
            config.source_date_epoch = Some(parse_u64(SOURCE_DATE_EPOCH, &v)?);
        }

        Ok(config)
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| Error::Config {
        message: format!("{key}: expected a non-negative integer, got {value:?}"),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| Error::Config {
        message: format!("{key}: expected a non-negative integer, got {value:?}"),
    })
}

fn parse_days(key: &str, value: &str) -> Result<Duration> {
    let days = parse_u64(key, value)?;
    Ok(Duration::from_secs(days * 24 * 60 * 60))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
