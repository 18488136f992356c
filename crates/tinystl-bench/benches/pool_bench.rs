//! Pooled allocator benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tinystl_bench::size_trace;
use tinystl_core::config::{PoolConfig, SafetyLevel};
use tinystl_core::malloc::{PoolState, SimulatedHeap};
use tinystl_mem::PoolAllocator;

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[8, 32, 64, 128, 256, 4096];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("pool", size), &size, |b, &sz| {
            let mut pool = PoolAllocator::with_config(PoolConfig::with_level(SafetyLevel::Off));
            b.iter(|| {
                let ptr = pool.allocate(sz).unwrap();
                criterion::black_box(ptr);
                // SAFETY: allocated just above with the same size.
                unsafe { pool.deallocate(ptr, sz) };
            });
        });
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                let v = vec![0u8; sz];
                criterion::black_box(v);
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");

    group.bench_function("1000x64B_pool", |b| {
        let mut pool = PoolAllocator::with_config(PoolConfig::with_level(SafetyLevel::Off));
        b.iter(|| {
            let held: Vec<_> = (0..1000).map(|_| pool.allocate(64).unwrap()).collect();
            for ptr in held {
                // SAFETY: allocated above with 64 bytes.
                unsafe { pool.deallocate(ptr, 64) };
            }
        });
    });

    group.bench_function("1000x64B_system", |b| {
        b.iter(|| {
            let allocs: Vec<Vec<u8>> = (0..1000).map(|_| vec![0u8; 64]).collect();
            criterion::black_box(allocs);
        });
    });

    group.finish();
}

fn bench_policy_mixed_trace(c: &mut Criterion) {
    let trace = size_trace(0x5eed, 4096, 128);
    let mut group = c.benchmark_group("policy_mixed_trace");

    for level in [SafetyLevel::Off, SafetyLevel::Strict, SafetyLevel::Hardened] {
        group.bench_with_input(
            BenchmarkId::new("simulated", format!("{level:?}")),
            &level,
            |b, &level| {
                b.iter(|| {
                    let mut pool =
                        PoolState::with_config(SimulatedHeap::unlimited(), PoolConfig::with_level(level));
                    let mut held = Vec::with_capacity(trace.len());
                    for &n in &trace {
                        held.push((pool.allocate(n).unwrap(), n));
                        if held.len() % 4 == 0 {
                            let (addr, n) = held.swap_remove(held.len() / 2);
                            pool.deallocate(addr, n);
                        }
                    }
                    criterion::black_box(pool.stats());
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_policy_mixed_trace
);
criterion_main!(benches);
