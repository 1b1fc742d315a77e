//! Criterion micro-benchmarks for shared-region writes, buffer growth and
//! the materialization pass.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use tandem_bench::populated_lattice;
use tandem_core::{Engine, MetaField, MetadataRecord, PositionBuffer, COORDS_PER_ENTITY};
use tandem_runtime::grown_capacity;

const ENTITIES: usize = 100_000;

/// Benchmark: widen 100K entities of f32 coordinates into the f64 buffer.
fn bench_write_widened_100k(c: &mut Criterion) {
    let buffer = PositionBuffer::with_capacity(ENTITIES);
    let src: Vec<f32> = (0..ENTITIES * COORDS_PER_ENTITY)
        .map(|i| i as f32 * 0.001)
        .collect();
    c.bench_function("write_widened_100k", |b| {
        b.iter(|| black_box(buffer.write_widened(black_box(&src))));
    });
}

/// Benchmark: grow a full 100K-entity buffer to the next capacity.
fn bench_grow_from_100k(c: &mut Criterion) {
    let old = PositionBuffer::with_capacity(ENTITIES);
    let src = vec![1.5f32; ENTITIES * COORDS_PER_ENTITY];
    old.write_widened(&src);
    let target = grown_capacity(ENTITIES as u64 + 1, 1000).unwrap_or(2 * ENTITIES);
    c.bench_function("grow_from_100k", |b| {
        b.iter(|| black_box(PositionBuffer::grow_from(&old, target)));
    });
}

/// Benchmark: publish the counters the executor writes after each step.
fn bench_metadata_publish(c: &mut Criterion) {
    let meta = MetadataRecord::new(ENTITIES as u64);
    let mut step = 0u64;
    c.bench_function("metadata_publish", |b| {
        b.iter(|| {
            step += 1;
            meta.store(MetaField::Timestep, step);
            meta.store(MetaField::EntityCount, ENTITIES as u64);
            black_box(meta.snapshot());
        });
    });
}

/// Benchmark: one engine step, then compute and copy 10K positions.
fn bench_step_and_materialize_10k(c: &mut Criterion) {
    let mut engine = populated_lattice(10_000, 42).unwrap();
    let buffer = PositionBuffer::with_capacity(10_000);
    c.bench_function("step_and_materialize_10k", |b| {
        b.iter(|| {
            engine.step().unwrap();
            let count = engine.compute_particles().unwrap();
            black_box(buffer.write_widened(engine.positions()));
            black_box(count);
        });
    });
}

criterion_group!(
    benches,
    bench_write_widened_100k,
    bench_grow_from_100k,
    bench_metadata_publish,
    bench_step_and_materialize_10k
);
criterion_main!(benches);
