//! Lock manager benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graphkern_core::{LockGuard, LockManager, Locks, ResourceType};

/// Benchmark uncontended acquire/release pairs.
fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_uncontended");
    let manager = LockManager::new();
    let client = manager.client();

    group.throughput(Throughput::Elements(1));
    group.bench_function("exclusive", |b| {
        b.iter(|| {
            let guard = LockGuard::exclusive(&client, ResourceType::Node, black_box(1)).unwrap();
            drop(guard);
        });
    });
    group.bench_function("shared", |b| {
        b.iter(|| {
            client.acquire_shared(ResourceType::Node, black_box(1)).unwrap();
            client.release_shared(ResourceType::Node, 1).unwrap();
        });
    });
    group.finish();
}

/// Benchmark acquiring many distinct resources with one client.
fn bench_many_resources(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_many_resources");
    let manager = LockManager::new();

    for count in [10u64, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let client = manager.client();
            b.iter(|| {
                for id in 0..count {
                    client.acquire_shared(ResourceType::Schema, id).unwrap();
                }
                client.release_all();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_many_resources);
criterion_main!(benches);
