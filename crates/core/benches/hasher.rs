// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Two-tier hasher benchmarks: the metadata tier should stay roughly flat
//! with file size while the content tier scales with bytes read, which is
//! the whole point of skipping it on an unchanged file.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::fs;

use buildcore::hash::FastHasher;

fn fixture(size: usize) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.bin");
    fs::write(&path, vec![b'x'; size]).unwrap();
    (dir, path)
}

fn bench_metadata_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("hasher_metadata");
    for size in [1_024, 1_048_576, 16 * 1_048_576] {
        let (_dir, path) = fixture(size);
        let hasher = FastHasher::new();
        group.bench_with_input(BenchmarkId::new("metadata_hash", size), &path, |b, path| {
            b.iter(|| black_box(hasher.metadata_hash(path).unwrap()));
        });
    }
}

fn bench_content_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("hasher_content");
    for size in [1_024, 1_048_576, 16 * 1_048_576] {
        let (_dir, path) = fixture(size);
        let hasher = FastHasher::new();
        group.bench_with_input(BenchmarkId::new("content_hash", size), &path, |b, path| {
            b.iter(|| black_box(hasher.content_hash(path).unwrap()));
        });
    }
}

fn bench_two_tier_unchanged(c: &mut Criterion) {
    let mut group = c.benchmark_group("hasher_two_tier_unchanged");
    for size in [1_024, 1_048_576] {
        let (_dir, path) = fixture(size);
        let hasher = FastHasher::new();
        let metadata = hasher.metadata_hash(&path).unwrap();
        group.bench_with_input(BenchmarkId::new("two_tier", size), &path, |b, path| {
            b.iter(|| black_box(hasher.two_tier(path, Some(metadata)).unwrap()));
        });
    }
}

criterion_group!(
    benches,
    bench_metadata_hash,
    bench_content_hash,
    bench_two_tier_unchanged,
);
criterion_main!(benches);
