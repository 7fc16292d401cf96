// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::*;
use crate::env::WorkspaceConfig;
use crate::envelope::IntegrityKey;
use crate::hash::ContentHash;
use crate::ids::ActionType;
use crate::workspace::WorkspaceLayout;

fn key() -> IntegrityKey {
    IntegrityKey::derive(Path::new("/ws"), b"secret")
}

fn target(name: &str) -> TargetId {
    TargetId::parse(&format!("//pkg:{name}")).unwrap()
}

fn coordinator(dir: &Path) -> CacheCoordinator {
    let target_cache = TargetCache::open(dir.join("target.bin"), key()).unwrap();
    let action_cache = ActionCache::open(dir.join("action.bin"), key()).unwrap();
    let source_repo = SourceRepo::open(dir.join("blobs"), dir.join("index.bin")).unwrap();
    let (events, _receiver) = EventPublisher::bounded(16);
    CacheCoordinator::new(target_cache, action_cache, source_repo, events)
}

#[test]
fn target_hit_and_miss_update_stats() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("main.rs");
    fs::write(&src, b"fn main() {}").unwrap();

    let coord = coordinator(dir.path());
    let t = target("a");

    assert!(!coord.is_cached(&t, &[src.clone()], &[]).unwrap());
    coord
        .update(t.clone(), &[src.clone()], &[], ContentHash::of_bytes(b"out"))
        .unwrap();
    assert!(coord.is_cached(&t, &[src.clone()], &[]).unwrap());

    let stats = coord.stats();
    assert_eq!(stats.target_hits, 1);
    assert_eq!(stats.target_misses, 1);
    assert!(stats.hit_rate() > 0.0);
}

#[test]
fn action_hit_and_miss_update_stats() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    fs::write(&input, b"hello").unwrap();
    let output = dir.path().join("out.bin");
    fs::write(&output, b"out").unwrap();

    let coord = coordinator(dir.path());
    let action = ActionId::new(target("a"), ActionType::Compile, None, "h".to_string());
    let metadata: BTreeMap<String, String> = BTreeMap::new();

    assert!(!coord.is_action_cached(&action, &[input.clone()], &metadata).unwrap());
    coord
        .record_action(action.clone(), &[input.clone()], vec![output.clone()], metadata.clone())
        .unwrap();
    assert!(coord.is_action_cached(&action, &[input], &metadata).unwrap());

    let stats = coord.stats();
    assert_eq!(stats.action_hits, 1);
    assert_eq!(stats.action_misses, 1);
}

#[test]
fn batch_validate_reports_aggregate_hit_rate() {
    let dir = tempfile::tempdir().unwrap();
    let src_a = dir.path().join("a.rs");
    let src_b = dir.path().join("b.rs");
    fs::write(&src_a, b"a").unwrap();
    fs::write(&src_b, b"b").unwrap();

    let coord = coordinator(dir.path());
    let t_a = target("a");
    let t_b = target("b");
    coord
        .update(t_a.clone(), &[src_a.clone()], &[], ContentHash::of_bytes(b"out-a"))
        .unwrap();

    let requests = vec![
        ValidationRequest::Target {
            target: t_a,
            sources: vec![src_a],
            deps: vec![],
        },
        ValidationRequest::Target {
            target: t_b,
            sources: vec![src_b],
            deps: vec![],
        },
    ];
    let batch = coord.batch_validate(requests);
    assert_eq!(batch.results.len(), 2);
    assert_eq!(batch.hit_rate, 0.5);
}

#[test]
fn run_gc_keeps_only_referenced_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("main.rs");
    fs::write(&src, b"fn main() {}").unwrap();

    let coord = coordinator(dir.path());
    let t = target("a");
    let live_hash = coord.store_source(&src).unwrap().hash;
    coord
        .update(t, &[src.clone()], &[], live_hash.clone())
        .unwrap();

    let orphan = coord.source_repo.blob_store().put(b"orphaned bytes").unwrap();

    let report = coord.run_gc().unwrap();
    assert_eq!(report.removed, 1);
    assert!(coord.source_repo.blob_store().get(&live_hash).is_ok());
    assert!(coord.source_repo.blob_store().get(&orphan).is_err());
    assert_eq!(coord.stats().gc_runs, 1);
}

#[test]
fn flush_then_reopen_preserves_target_entries() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("main.rs");
    fs::write(&src, b"fn main() {}").unwrap();

    {
        let coord = coordinator(dir.path());
        coord
            .update(target("a"), &[src.clone()], &[], ContentHash::of_bytes(b"out"))
            .unwrap();
        coord.close().unwrap();
    }

    let coord = coordinator(dir.path());
    assert!(coord.is_cached(&target("a"), &[src], &[]).unwrap());
}

#[test]
fn drop_without_close_still_flushes_best_effort() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("main.rs");
    fs::write(&src, b"fn main() {}").unwrap();

    {
        let coord = coordinator(dir.path());
        coord
            .update(target("a"), &[src.clone()], &[], ContentHash::of_bytes(b"out"))
            .unwrap();
    }

    let coord = coordinator(dir.path());
    assert!(coord.is_cached(&target("a"), &[src], &[]).unwrap());
}

#[test]
fn open_initializes_layout_and_holds_the_workspace_lock() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join(".cache-root");
    let layout = WorkspaceLayout::new(&root);
    let (events, _receiver) = EventPublisher::bounded(16);

    let coord = CacheCoordinator::open(&layout, WorkspaceConfig::default(), events).unwrap();
    assert!(layout.gitignore().exists());

    let (events2, _receiver2) = EventPublisher::bounded(16);
    assert!(CacheCoordinator::open(&layout, WorkspaceConfig::default(), events2).is_err());

    coord.close().unwrap();

    let (events3, _receiver3) = EventPublisher::bounded(16);
    assert!(CacheCoordinator::open(&layout, WorkspaceConfig::default(), events3).is_ok());
}
