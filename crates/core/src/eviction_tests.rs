// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

fn at(now: SystemTime, secs_ago: u64) -> SystemTime {
    now - Duration::from_secs(secs_ago)
}

#[test]
fn no_eviction_when_all_bounds_satisfied() {
    let now = SystemTime::now();
    let bounds = EvictionBounds {
        max_bytes: 1000,
        max_entries: 10,
        max_age: Duration::from_secs(100),
    };
    let entries = vec![
        EntryInfo { key: "a", size: 10, last_access: at(now, 1) },
        EntryInfo { key: "b", size: 10, last_access: at(now, 2) },
    ];
    assert!(select_victims(&entries, &bounds, now).is_empty());
}

#[test]
fn evicts_oldest_first_to_satisfy_count_bound() {
    let now = SystemTime::now();
    let bounds = EvictionBounds {
        max_bytes: u64::MAX,
        max_entries: 1,
        max_age: Duration::from_secs(u64::MAX),
    };
    let entries = vec![
        EntryInfo { key: "old", size: 10, last_access: at(now, 100) },
        EntryInfo { key: "new", size: 10, last_access: at(now, 1) },
    ];
    let victims = select_victims(&entries, &bounds, now);
    assert_eq!(victims, vec!["old"]);
}

#[test]
fn evicts_to_satisfy_byte_bound() {
    let now = SystemTime::now();
    let bounds = EvictionBounds {
        max_bytes: 15,
        max_entries: usize::MAX,
        max_age: Duration::from_secs(u64::MAX),
    };
    let entries = vec![
        EntryInfo { key: "old", size: 10, last_access: at(now, 100) },
        EntryInfo { key: "mid", size: 10, last_access: at(now, 50) },
        EntryInfo { key: "new", size: 10, last_access: at(now, 1) },
    ];
    let victims = select_victims(&entries, &bounds, now);
    // 30 bytes total, bound 15: evict until <= 15, oldest first.
    assert_eq!(victims, vec!["old", "mid"]);
}

#[test]
fn entry_at_exactly_max_age_minus_epsilon_is_retained() {
    let now = SystemTime::now();
    let bounds = EvictionBounds {
        max_bytes: u64::MAX,
        max_entries: usize::MAX,
        max_age: Duration::from_secs(100),
    };
    let entries = vec![EntryInfo {
        key: "fresh",
        size: 10,
        last_access: at(now, 99),
    }];
    assert!(select_victims(&entries, &bounds, now).is_empty());
}

#[test]
fn entry_at_exactly_max_age_plus_epsilon_is_evicted() {
    let now = SystemTime::now();
    let bounds = EvictionBounds {
        max_bytes: u64::MAX,
        max_entries: usize::MAX,
        max_age: Duration::from_secs(100),
    };
    let entries = vec![EntryInfo {
        key: "stale",
        size: 10,
        last_access: at(now, 101),
    }];
    assert_eq!(select_victims(&entries, &bounds, now), vec!["stale"]);
}

#[test]
fn prefers_larger_entries_among_equally_stale() {
    let now = SystemTime::now();
    let bounds = EvictionBounds {
        max_bytes: 10,
        max_entries: usize::MAX,
        max_age: Duration::from_secs(u64::MAX),
    };
    let same_time = at(now, 50);
    let entries = vec![
        EntryInfo { key: "small", size: 1, last_access: same_time },
        EntryInfo { key: "large", size: 100, last_access: same_time },
    ];
    let victims = select_victims(&entries, &bounds, now);
    assert_eq!(victims.first(), Some(&"large"));
}

#[test]
fn epoch_round_trips() {
    let now = SystemTime::now();
    let secs = to_epoch_secs(now);
    let back = from_epoch_secs(secs);
    assert_eq!(to_epoch_secs(back), secs);
}
