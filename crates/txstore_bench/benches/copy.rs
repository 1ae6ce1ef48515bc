//! Content copy benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io;
use txstore_bench::content;
use txstore_core::copy_content;

/// Benchmark copying with a known length across buffer sizes.
fn bench_copy_known_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("copy_known_length");
    let data = content(1 << 20);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for buffer in [512, 8192, 65536].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(buffer), buffer, |b, &buffer| {
            b.iter(|| {
                let copied = copy_content(
                    &mut data.as_slice(),
                    &mut io::sink(),
                    Some(data.len() as u64),
                    buffer,
                )
                .unwrap();
                black_box(copied);
            });
        });
    }

    group.finish();
}

/// Benchmark copying until end of input.
fn bench_copy_unknown_length(c: &mut Criterion) {
    let data = content(1 << 20);

    c.bench_function("copy_unknown_length_8k", |b| {
        b.iter(|| {
            let copied = copy_content(&mut data.as_slice(), &mut io::sink(), None, 8192).unwrap();
            black_box(copied);
        });
    });
}

criterion_group!(benches, bench_copy_known_length, bench_copy_unknown_length);
criterion_main!(benches);
