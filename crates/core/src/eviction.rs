// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! LRU + size/age/count eviction policy.
//!
//! Applied at `flush()`, never inside hot lookups: the caller builds an
//! `Entries` snapshot of `(key, size, last_access)` tuples, and
//! `select_victims` returns the keys to drop, ordered oldest-`last_access`
//! first, then by smallest `last_access`-to-size utility (recency per byte
//! — evicting large, stale entries before small, stale ones once the
//! bounds are otherwise satisfied).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Bounds applied at flush time.
#[derive(Debug, Clone, Copy)]
pub struct EvictionBounds {
    pub max_bytes: u64,
    pub max_entries: usize,
    pub max_age: Duration,
}

impl EvictionBounds {
    /// Defaults for the target cache: 1 GiB / 10 000 entries / 30 days.
    pub fn target_cache_defaults() -> Self {
        Self {
            max_bytes: 1024 * 1024 * 1024,
            max_entries: 10_000,
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    /// Defaults for the action cache: 1 GiB / 50 000 entries / 30 days.
    pub fn action_cache_defaults() -> Self {
        Self {
            max_bytes: 1024 * 1024 * 1024,
            max_entries: 50_000,
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// One entry's eviction-relevant metadata.
#[derive(Debug, Clone, Copy)]
pub struct EntryInfo<K> {
    pub key: K,
    pub size: u64,
    pub last_access: SystemTime,
}

/// Select the keys to evict so that, once removed, the remaining set
/// satisfies all of `bounds`. Input order is irrelevant; ties in
/// `last_access` are broken by ascending size (evict the entry that buys
/// the most space back per stale byte first).
pub fn select_victims<K: Clone>(entries: &[EntryInfo<K>], bounds: &EvictionBounds, now: SystemTime) -> Vec<K> {
    let mut candidates: Vec<&EntryInfo<K>> = entries.iter().collect();

    // Oldest last_access first; among equal ages, smallest last_access-to-size
    // utility first (i.e. larger entries are preferred victims when equally
    // stale, since they free more space per eviction).
    candidates.sort_by(|a, b| {
        a.last_access
            .cmp(&b.last_access)
            .then_with(|| b.size.cmp(&a.size))
    });

    let mut total_bytes: u64 = entries.iter().map(|e| e.size).sum();
    let mut total_entries = entries.len();
    let mut victims = Vec::new();

    for entry in &candidates {
        let oldest_age = now
            .duration_since(entry.last_access)
            .unwrap_or(Duration::ZERO);
        let over_age = oldest_age > bounds.max_age;
        let over_bytes = total_bytes > bounds.max_bytes;
        let over_count = total_entries > bounds.max_entries;

        // `candidates` is sorted oldest-first, so as long as *any* bound is
        // still exceeded we evict the next (oldest-or-largest) entry; once
        // all three hold for the current oldest remaining entry, every
        // younger entry also satisfies the age bound and we can stop.
        if !(over_age || over_bytes || over_count) {
            break;
        }

        victims.push(entry.key.clone());
        total_bytes = total_bytes.saturating_sub(entry.size);
        total_entries -= 1;
    }

    victims
}

/// Seconds-since-epoch helper used when persisting `last_access` alongside
/// cache entries (the wire format stores timestamps as integers, not
/// `SystemTime`).
pub fn to_epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

pub fn from_epoch_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[cfg(test)]
#[path = "eviction_tests.rs"]
mod tests;
