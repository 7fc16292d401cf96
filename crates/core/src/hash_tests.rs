// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::fs;
use std::thread;
use std::time::Duration;

use super::*;

#[test]
fn content_hash_is_stable_for_same_bytes() {
    let a = ContentHash::of_bytes(b"hello");
    let b = ContentHash::of_bytes(b"hello");
    assert_eq!(a, b);
}

#[test]
fn content_hash_differs_for_different_bytes() {
    let a = ContentHash::of_bytes(b"hello");
    let b = ContentHash::of_bytes(b"world");
    assert_ne!(a, b);
}

#[test]
fn empty_file_hashes_to_well_defined_empty_hash() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty");
    fs::write(&path, b"").unwrap();

    let hasher = FastHasher::new();
    let hash = hasher.content_hash(&path).unwrap();
    assert_eq!(hash, empty_content_hash());
}

#[test]
fn two_tier_unchanged_when_metadata_matches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.txt");
    fs::write(&path, b"v1").unwrap();

    let hasher = FastHasher::new();
    let meta = hasher.metadata_hash(&path).unwrap();

    match hasher.two_tier(&path, Some(meta)).unwrap() {
        TwoTierResult::Unchanged => {}
        TwoTierResult::Changed(_) => panic!("expected unchanged"),
    }
}

#[test]
fn two_tier_changed_when_metadata_differs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.txt");
    fs::write(&path, b"v1").unwrap();

    let hasher = FastHasher::new();
    let stale = MetadataHash::from_metadata(&fs::metadata(&path).unwrap());

    // Force an mtime change so the metadata tier reliably reports different.
    thread::sleep(Duration::from_millis(10));
    fs::write(&path, b"v2-longer-content").unwrap();

    match hasher.two_tier(&path, Some(stale)).unwrap() {
        TwoTierResult::Changed(hash) => {
            assert_eq!(hash, ContentHash::of_bytes(b"v2-longer-content"));
        }
        TwoTierResult::Unchanged => panic!("expected changed"),
    }
}

#[test]
fn two_tier_with_no_prior_metadata_computes_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.txt");
    fs::write(&path, b"fresh").unwrap();

    let hasher = FastHasher::new();
    match hasher.two_tier(&path, None).unwrap() {
        TwoTierResult::Changed(hash) => assert_eq!(hash, ContentHash::of_bytes(b"fresh")),
        TwoTierResult::Unchanged => panic!("expected changed with no prior metadata"),
    }
}

#[test]
fn session_memo_avoids_rereading_unchanged_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.txt");
    fs::write(&path, b"stable").unwrap();

    let hasher = FastHasher::new();
    let _ = hasher.two_tier(&path, None).unwrap();
    let before = hasher.stats().content_hashes;

    let _ = hasher.two_tier(&path, None).unwrap();
    let after = hasher.stats().content_hashes;

    assert_eq!(before, after, "second call should hit the session memo");
    assert!(hasher.stats().cache_hits >= 1);
}

#[test]
fn clear_drops_the_session_memo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.txt");
    fs::write(&path, b"stable").unwrap();

    let hasher = FastHasher::new();
    let _ = hasher.two_tier(&path, None).unwrap();
    hasher.clear();
    let before = hasher.stats().content_hashes;

    let _ = hasher.two_tier(&path, None).unwrap();
    let after = hasher.stats().content_hashes;

    assert_eq!(after, before + 1, "memo was cleared, so content is rehashed");
}

#[test]
fn metadata_hash_for_missing_file_is_not_found() {
    let hasher = FastHasher::new();
    let err = hasher
        .metadata_hash(Path::new("/nonexistent/path/does/not/exist"))
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}
