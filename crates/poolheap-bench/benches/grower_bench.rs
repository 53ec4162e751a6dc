//! Region grower and refill benchmarks.

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use poolheap_arena::{
    BumpGrower, FreeListHeap, HeapConfig, POOL_ALIGN, SystemPoolSource, acquire_pool,
};

const POOL_BYTES: usize = 4 * 1024 * 1024;

fn fresh_grower() -> BumpGrower {
    let pool = acquire_pool(&mut SystemPoolSource::new(POOL_BYTES), POOL_ALIGN).expect("pool");
    BumpGrower::new(pool)
}

fn bench_bump_until_exhausted(c: &mut Criterion) {
    let mut group = c.benchmark_group("bump_until_exhausted");

    for step in [64isize, 4096, 65536] {
        group.bench_with_input(BenchmarkId::from_parameter(step), &step, |b, &step| {
            b.iter_batched(
                fresh_grower,
                |mut grower| {
                    let mut grants = 0u32;
                    while grower.grow(step).is_ok() {
                        grants += 1;
                    }
                    criterion::black_box(grants)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_heap_fill_by_granule(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_fill_by_granule");

    for granule in [4096usize, 64 * 1024, 1024 * 1024] {
        let config = HeapConfig::default().with_grow_granule(granule);
        group.bench_with_input(BenchmarkId::from_parameter(granule), &config, |b, cfg| {
            b.iter_batched(
                || FreeListHeap::new(fresh_grower(), cfg),
                |mut heap| {
                    let mut live = 0u32;
                    while !heap.allocate(criterion::black_box(200)).is_null() {
                        live += 1;
                    }
                    criterion::black_box((live, heap.stats().grow_calls))
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bump_until_exhausted, bench_heap_fill_by_granule);
criterion_main!(benches);
