//! Index population benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use graphkern_bench::{generate_store, schemas, CountingPopulator, NullProxy};
use graphkern_core::{
    EntityId, EntityType, IndexDescriptor, IndexEntryUpdate, IndexId, MultipleIndexPopulator,
    NoLocks, PopulationConfig, StoreView, Value,
};
use std::sync::Arc;

fn populator(
    store: Arc<dyn StoreView>,
    indexes: usize,
    batch_size: usize,
) -> Arc<MultipleIndexPopulator> {
    let populator = Arc::new(MultipleIndexPopulator::new(
        store,
        Arc::new(NoLocks),
        EntityType::Node,
        PopulationConfig::new().batch_size(batch_size),
    ));
    for (n, schema) in schemas().into_iter().cycle().take(indexes).enumerate() {
        let descriptor = IndexDescriptor::new(IndexId::new(n as u64), schema, format!("bench_{n}"));
        populator
            .add_populator(
                Box::new(CountingPopulator::default()),
                descriptor,
                Arc::new(NullProxy),
                Arc::new(NullProxy),
                "bench",
            )
            .unwrap();
    }
    populator.create();
    populator
}

/// Benchmark a full population pass by number of indexes sharing the scan.
fn bench_populate_indexes(c: &mut Criterion) {
    let mut group = c.benchmark_group("populate_indexes");
    let entities = 10_000;
    let store = generate_store(entities);

    for indexes in [1, 3, 6].iter() {
        group.throughput(Throughput::Elements(entities));
        group.bench_with_input(BenchmarkId::from_parameter(indexes), indexes, |b, &indexes| {
            b.iter(|| {
                let populator = populator(store.clone(), indexes, 100);
                let summary = populator.index_all_entities().unwrap().run().unwrap();
                black_box(summary);
            });
        });
    }
    group.finish();
}

/// Benchmark a full population pass by scan batch size.
fn bench_populate_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("populate_batch_size");
    let entities = 10_000;
    let store = generate_store(entities);

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(entities));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    let populator = populator(store.clone(), 3, batch_size);
                    let summary = populator.index_all_entities().unwrap().run().unwrap();
                    black_box(summary);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark routing live updates while the scan has not started.
fn bench_queue_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_update");
    let store = generate_store(0);
    let schema = schemas().remove(0);

    for updates in [100u64, 1000].iter() {
        group.throughput(Throughput::Elements(*updates));
        group.bench_with_input(BenchmarkId::from_parameter(updates), updates, |b, &updates| {
            b.iter(|| {
                let populator = populator(store.clone(), 3, 100);
                for id in 0..updates {
                    populator.queue_update(IndexEntryUpdate::add(
                        EntityId::new(id),
                        schema.clone(),
                        vec![Value::from("x")],
                    ));
                }
                black_box(populator.summary());
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_populate_indexes,
    bench_populate_batch_size,
    bench_queue_update
);
criterion_main!(benches);
