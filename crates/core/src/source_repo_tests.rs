// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::fs;
use std::path::Path;

use super::*;

fn open_repo(dir: &Path) -> SourceRepo {
    SourceRepo::open(dir.join("blobs"), dir.join("index.bin")).unwrap()
}

#[test]
fn store_then_fetch_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let repo = open_repo(dir.path());
    let src = dir.path().join("a.txt");
    fs::write(&src, b"hello").unwrap();

    let source_ref = repo.store(&src).unwrap();
    assert_eq!(repo.fetch(&source_ref.hash).unwrap(), b"hello");
}

#[test]
fn store_batch_reports_dedup_ratio() {
    let dir = tempfile::tempdir().unwrap();
    let repo = open_repo(dir.path());
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    let c = dir.path().join("c.txt");
    fs::write(&a, b"same").unwrap();
    fs::write(&b, b"same").unwrap();
    fs::write(&c, b"different").unwrap();

    let set = repo.store_batch(&[a, b, c]).unwrap();
    assert_eq!(set.refs.len(), 3);
    // 2 unique hashes out of 3 stored -> ratio = 1 - 2/3.
    assert!((set.dedup_ratio - (1.0 - 2.0 / 3.0)).abs() < 1e-9);
}

#[test]
fn materialize_writes_bytes_to_destination() {
    let dir = tempfile::tempdir().unwrap();
    let repo = open_repo(dir.path());
    let src = dir.path().join("a.txt");
    fs::write(&src, b"payload").unwrap();
    let source_ref = repo.store(&src).unwrap();

    let dst = dir.path().join("out").join("a.txt");
    let created = repo.materialize(&source_ref.hash, &dst).unwrap();
    assert!(created);
    assert_eq!(fs::read(&dst).unwrap(), b"payload");
}

#[test]
fn materialize_is_noop_when_destination_already_matches() {
    let dir = tempfile::tempdir().unwrap();
    let repo = open_repo(dir.path());
    let src = dir.path().join("a.txt");
    fs::write(&src, b"payload").unwrap();
    let source_ref = repo.store(&src).unwrap();

    let dst = dir.path().join("out.txt");
    fs::write(&dst, b"payload").unwrap();
    let created = repo.materialize(&source_ref.hash, &dst).unwrap();
    assert!(!created);
}

#[test]
fn materialize_batch_tracks_created_updated_skipped_removed() {
    let dir = tempfile::tempdir().unwrap();
    let repo = open_repo(dir.path());
    let dest = dir.path().join("dest");

    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    fs::write(&a, b"one").unwrap();
    fs::write(&b, b"two").unwrap();
    let set1 = repo.store_batch(&[a.clone(), b.clone()]).unwrap();

    let report1 = repo.materialize_batch(&set1, &dest).unwrap();
    assert_eq!(report1.created, 2);
    assert_eq!(report1.skipped, 0);
    assert_eq!(report1.removed, 0);

    // Second pass: `a` unchanged, `b` edited, and dropped from the set
    // entirely (simulating a file removed from the build).
    fs::write(&b, b"two-edited").unwrap();
    let set2 = repo.store_batch(&[a.clone(), b.clone()]).unwrap();
    // drop "b" from the materialized set to exercise removal tracking
    let set2_only_a = SourceRefSet {
        refs: set2.refs.into_iter().filter(|r| r.path == a).collect(),
        dedup_ratio: 0.0,
    };
    let report2 = repo.materialize_batch(&set2_only_a, &dest).unwrap();
    assert_eq!(report2.skipped, 1);
    assert_eq!(report2.removed, 1);
    assert!(!dest.join("b.txt").exists());
}

#[test]
fn detect_changes_reports_edited_tracked_files() {
    let dir = tempfile::tempdir().unwrap();
    let repo = open_repo(dir.path());
    let src = dir.path().join("a.txt");
    fs::write(&src, b"v1").unwrap();
    repo.store(&src).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(10));
    fs::write(&src, b"v2").unwrap();

    let changes = repo.detect_changes(&[src.clone()]).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path, src);
    assert_ne!(changes[0].old_hash, changes[0].new_hash);
}

#[test]
fn detect_changes_ignores_untracked_paths() {
    let dir = tempfile::tempdir().unwrap();
    let repo = open_repo(dir.path());
    let src = dir.path().join("never-stored.txt");
    fs::write(&src, b"x").unwrap();

    let changes = repo.detect_changes(&[src]).unwrap();
    assert!(changes.is_empty());
}

#[test]
fn flush_index_then_reopen_preserves_tracked_hashes() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a.txt");
    fs::write(&src, b"v1").unwrap();

    {
        let repo = open_repo(dir.path());
        repo.store(&src).unwrap();
        repo.flush_index().unwrap();
    }

    let reopened = open_repo(dir.path());
    std::thread::sleep(std::time::Duration::from_millis(10));
    fs::write(&src, b"v2").unwrap();
    let changes = reopened.detect_changes(&[src]).unwrap();
    assert_eq!(changes.len(), 1);
}
