//! Staged-file write, rotation and rollback benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::num::NonZeroU32;
use std::sync::Arc;
use tempfile::TempDir;
use txstore_bench::{content, key, registry};
use txstore_core::TransactionContext;
use txstore_storage::{FileStore, InMemoryStore};

/// Benchmark write + commit (full rotation) against memory.
fn bench_inmemory_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_commit");

    for size in [256, 4096, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let registry = registry(Arc::new(InMemoryStore::new()), None);
            let data = content(size);

            b.iter(|| {
                let mut ctx = TransactionContext::begin(&registry);
                ctx.blob_store(&key(1))
                    .unwrap()
                    .write(&mut black_box(data.as_slice()), Some(size as u64))
                    .unwrap();
                ctx.commit().unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark write + commit against a directory on disk.
fn bench_file_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_commit");

    // Use larger sample size for file operations
    group.sample_size(50);

    for size in [4096, 65536, 1 << 20].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let files = FileStore::open(temp_dir.path()).unwrap();
            let registry = registry(Arc::new(files), NonZeroU32::new(16));
            let data = content(size);

            b.iter(|| {
                let mut ctx = TransactionContext::begin(&registry);
                ctx.blob_store(&key(7))
                    .unwrap()
                    .write(&mut black_box(data.as_slice()), None)
                    .unwrap();
                ctx.commit().unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark write + rollback, which only stages and discards.
fn bench_file_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_rollback");
    group.sample_size(50);

    let temp_dir = TempDir::new().unwrap();
    let files = FileStore::open(temp_dir.path()).unwrap();
    let registry = registry(Arc::new(files), None);
    let data = content(65536);
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("64k", |b| {
        b.iter(|| {
            let mut ctx = TransactionContext::begin(&registry);
            ctx.blob_store(&key(3))
                .unwrap()
                .write(&mut data.as_slice(), None)
                .unwrap();
            ctx.rollback().unwrap();
        });
    });

    group.finish();
}

/// Benchmark reads of committed content.
fn bench_file_read(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let files = FileStore::open(temp_dir.path()).unwrap();
    let registry = registry(Arc::new(files), None);
    let data = content(65536);

    let mut ctx = TransactionContext::begin(&registry);
    ctx.blob_store(&key(9))
        .unwrap()
        .write(&mut data.as_slice(), None)
        .unwrap();
    ctx.commit().unwrap();

    c.bench_function("file_read_64k", |b| {
        let mut out = Vec::with_capacity(data.len());
        b.iter(|| {
            out.clear();
            let n = registry.read(&key(9), &mut out).unwrap();
            black_box(n);
        });
    });
}

criterion_group!(
    benches,
    bench_inmemory_commit,
    bench_file_commit,
    bench_file_rollback,
    bench_file_read
);
criterion_main!(benches);
