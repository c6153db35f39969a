//! Integration tests for multi-index population.

use graphkern_core::{
    CoreError, EntityId, EntityRecord, EntityType, IndexId, InMemoryStore, LockConfig,
    LockManager, Locks, NoLocks, PopulationConfig, PopulationOutcome, PopulationState,
    ResourceType, SystemClock, UpdateKind, Value,
};
use graphkern_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn state(harness: &PopulationHarness, id: u64) -> PopulationState {
    harness
        .populator
        .population_for(IndexId::new(id))
        .unwrap()
        .state()
}

#[test]
fn populates_every_matching_entity() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let names = harness.add_index(1, person_name_schema());

    let summary = harness.run().unwrap();

    assert_eq!(summary.online(), 1);
    assert_eq!(names.entries(), expected_entries(store.as_ref(), &person_name_schema()));
    assert!(names.is_created());
    assert_eq!(names.closed(), Some(true));
    assert_eq!(harness.flip_target.flipped(), vec![IndexId::new(1)]);
    assert!(harness.failures.failures().is_empty());
}

#[test]
fn one_scan_feeds_all_indexes() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let names = harness.add_index(1, person_name_schema());
    let ages = harness.add_index(2, person_age_schema());
    let companies = harness.add_index(3, company_name_schema());

    harness.run().unwrap();

    // Five chunks of four plus the read that finds the table exhausted.
    assert_eq!(harness.hooked.reads(), 6);
    assert_eq!(names.entries(), expected_entries(store.as_ref(), &person_name_schema()));
    assert_eq!(ages.entries(), expected_entries(store.as_ref(), &person_age_schema()));
    assert_eq!(
        companies.entries(),
        expected_entries(store.as_ref(), &company_name_schema())
    );

    // Each entity was delivered exactly once per index by the scan.
    for index in [&names, &ages, &companies] {
        let delivered = index.delivered();
        let mut ids: Vec<_> = delivered.iter().map(|u| u.entity_id()).collect();
        ids.dedup();
        assert_eq!(ids.len(), delivered.len());
    }
}

#[test]
fn update_ahead_of_scan_is_queued_until_drained() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let names = harness.add_index(1, person_name_schema());
    let population = harness.populator.population_for(IndexId::new(1)).unwrap();

    // Chunks are 0..=3 and 4..=7; before entity 8 is read the scan has
    // completed entity 7 and has not passed 8.
    let writer = harness.writer();
    let observed = Arc::clone(&population);
    harness.before_read(move |start| {
        if start == EntityId::new(8) {
            writer.set(8, NAME, "renamed").unwrap();
            assert_eq!(observed.queue_len(), 1);
        }
    });

    harness.run().unwrap();

    let counters = population.progress();
    assert_eq!(counters.updates_queued, 1);
    assert_eq!(counters.updates_applied_directly, 0);
    assert_eq!(counters.updates_drained, 1);
    assert_eq!(counters.queue_length, 0);

    // The scan saw the new value; the queued change lands after it.
    let kinds = names.delivered_for(EntityId::new(8));
    assert_eq!(kinds.len(), 2);
    assert_eq!(kinds[0], UpdateKind::Added(vec![Value::from("renamed")]));
    assert!(matches!(kinds[1], UpdateKind::Changed { .. }));
    assert_eq!(names.entries(), expected_entries(store.as_ref(), &person_name_schema()));
}

#[test]
fn update_behind_scan_is_applied_immediately_and_once() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let a = harness.add_index(1, person_name_schema());
    let b = harness.add_index(2, person_name_schema());

    let writer = harness.writer();
    harness.before_read(move |start| {
        if start == EntityId::new(8) {
            writer.set(1, NAME, "renamed").unwrap();
        }
    });

    harness.run().unwrap();

    for (id, index) in [(1, &a), (2, &b)] {
        let counters = harness
            .populator
            .population_for(IndexId::new(id))
            .unwrap()
            .progress();
        assert_eq!(counters.updates_applied_directly, 1);
        assert_eq!(counters.updates_queued, 0);
        assert_eq!(counters.updates_drained, 0);

        assert_eq!(
            index.delivered_for(EntityId::new(1)),
            vec![
                UpdateKind::Added(vec![Value::from("person-1")]),
                UpdateKind::Changed {
                    before: vec![Value::from("person-1")],
                    after: vec![Value::from("renamed")],
                },
            ]
        );
        assert_eq!(
            index.entries().get(&EntityId::new(1)),
            Some(&vec![Value::from("renamed")])
        );
    }
}

#[test]
fn failing_population_does_not_affect_siblings() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let failing = RecordingIndex::new();
    harness.add_populator(
        1,
        person_name_schema(),
        RecordingPopulator::new(IndexId::new(1), failing.clone()).fail_after(3),
    );
    let healthy = harness.add_index(2, person_name_schema());

    let summary = harness.run().unwrap();

    assert_eq!(state(&harness, 1), PopulationState::Failed);
    assert_eq!(state(&harness, 2), PopulationState::Online);
    assert_eq!(summary.online(), 1);
    assert_eq!(summary.failed(), 1);

    let report = summary.report(IndexId::new(1)).unwrap();
    match &report.outcome {
        PopulationOutcome::Failed { cause } => assert!(cause.contains("entry limit of 3")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(failing.closed(), Some(false));
    assert!(failing.failure().unwrap().contains("entry limit of 3"));
    assert_eq!(harness.failures.failures_for(IndexId::new(1)), 1);
    assert_eq!(harness.failures.failures_for(IndexId::new(2)), 0);

    assert_eq!(healthy.entries(), expected_entries(store.as_ref(), &person_name_schema()));
    assert_eq!(harness.flip_target.flipped(), vec![IndexId::new(2)]);
}

#[test]
fn failed_population_ignores_later_updates() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let failing = RecordingIndex::new();
    harness.add_populator(
        1,
        person_name_schema(),
        RecordingPopulator::new(IndexId::new(1), failing.clone()).fail_after(3),
    );
    harness.add_index(2, person_name_schema());

    let writer = harness.writer();
    harness.before_read(move |start| {
        if start == EntityId::new(12) {
            writer.set(2, NAME, "late").unwrap();
        }
    });
    harness.run().unwrap();

    let population = harness.populator.population_for(IndexId::new(1)).unwrap();
    assert!(!population.is_accepting_updates());
    assert_eq!(population.queue_len(), 0);
    assert!(failing.delivered_for(EntityId::new(2)).len() <= 1);
}

#[test]
fn creation_failure_is_isolated() {
    let store = people_store(8);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let broken = RecordingIndex::new();
    harness.add_populator(
        1,
        person_name_schema(),
        RecordingPopulator::new(IndexId::new(1), broken.clone()).fail_on_create(),
    );
    let ages = harness.add_index(2, person_age_schema());

    let summary = harness.run().unwrap();

    assert_eq!(state(&harness, 1), PopulationState::Failed);
    assert!(broken.delivered().is_empty());
    assert_eq!(broken.closed(), Some(false));
    assert_eq!(summary.online(), 1);
    assert_eq!(ages.entries(), expected_entries(store.as_ref(), &person_age_schema()));
}

#[test]
fn scan_failure_fails_every_population() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let names = harness.add_index(1, person_name_schema());
    let ages = harness.add_index(2, person_age_schema());
    harness.hooked.fail_reads_from(EntityId::new(8));

    let err = harness.run().unwrap_err();

    assert!(matches!(err, CoreError::ScanFailed { .. }));
    assert_eq!(state(&harness, 1), PopulationState::Failed);
    assert_eq!(state(&harness, 2), PopulationState::Failed);
    assert_eq!(names.closed(), Some(false));
    assert_eq!(ages.closed(), Some(false));
    assert_eq!(harness.failures.failures().len(), 2);
    assert!(harness.flip_target.flipped().is_empty());

    let summary = harness.populator.summary();
    assert_eq!(summary.failed(), 2);
    assert!(!summary.scan.complete);
}

#[test]
fn cancel_mid_scan_cancels_everything() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let names = harness.add_index(1, person_name_schema());
    let ages = harness.add_index(2, person_age_schema());

    let populator = Arc::clone(&harness.populator);
    harness.before_read(move |start| {
        if start == EntityId::new(8) {
            populator.cancel();
        }
    });

    let summary = harness.run().unwrap();

    assert!(summary
        .reports
        .iter()
        .all(|r| r.outcome == PopulationOutcome::Cancelled));
    assert!(summary.scan.cancelled);
    assert_eq!(names.closed(), Some(false));
    assert_eq!(ages.closed(), Some(false));
    assert!(harness.failures.failures().is_empty());
    assert!(harness.flip_target.flipped().is_empty());
}

#[test]
fn cancelling_one_population_keeps_the_rest() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let dropped = harness.add_index(1, person_name_schema());
    let kept = harness.add_index(2, person_age_schema());

    let populator = Arc::clone(&harness.populator);
    harness.before_read(move |start| {
        if start == EntityId::new(8) {
            let handle = populator.population_for(IndexId::new(1)).unwrap().handle();
            assert!(populator.cancel_population(handle));
        }
    });

    let summary = harness.run().unwrap();

    assert_eq!(state(&harness, 1), PopulationState::Cancelled);
    assert_eq!(state(&harness, 2), PopulationState::Online);
    assert_eq!(summary.online(), 1);
    assert_eq!(dropped.closed(), Some(false));
    assert!(dropped
        .delivered()
        .iter()
        .all(|u| u.entity_id() < EntityId::new(8)));
    assert_eq!(kept.entries(), expected_entries(store.as_ref(), &person_age_schema()));
}

#[test]
fn scan_stops_early_once_no_population_is_left() {
    let store = people_store(40);
    let harness = PopulationHarness::new(Arc::clone(&store));
    harness.add_populator(
        1,
        person_name_schema(),
        RecordingPopulator::new(IndexId::new(1), RecordingIndex::new()).fail_after(2),
    );

    let summary = harness.run().unwrap();

    assert_eq!(summary.failed(), 1);
    // The first chunk fails the only population; the scan does not read on.
    assert_eq!(harness.hooked.reads(), 1);
    assert!(summary.scan.complete);
}

#[test]
fn failure_while_draining_at_flip_is_isolated() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let failing = RecordingIndex::new();
    // Exactly the fifteen people the scan delivers fit; the queued update does not.
    harness.add_populator(
        1,
        person_name_schema(),
        RecordingPopulator::new(IndexId::new(1), failing.clone()).fail_after(15),
    );
    let healthy = harness.add_index(2, person_name_schema());

    let writer = harness.writer();
    harness.before_read(move |start| {
        if start == EntityId::new(16) {
            writer.set(17, NAME, "late").unwrap();
        }
    });
    let summary = harness.run().unwrap();

    assert_eq!(state(&harness, 1), PopulationState::Failed);
    assert_eq!(state(&harness, 2), PopulationState::Online);
    assert_eq!(summary.online(), 1);
    assert_eq!(summary.failed(), 1);

    assert_eq!(failing.delivered().len(), 15);
    assert_eq!(failing.closed(), Some(false));
    assert_eq!(harness.failures.failures_for(IndexId::new(1)), 1);
    assert_eq!(harness.failures.failures_for(IndexId::new(2)), 0);
    assert_eq!(harness.flip_target.flipped(), vec![IndexId::new(2)]);

    assert_eq!(healthy.entries(), expected_entries(store.as_ref(), &person_name_schema()));
    assert_eq!(
        healthy.entries().get(&EntityId::new(17)),
        Some(&vec![Value::from("late")])
    );
}

#[test]
fn failure_while_draining_during_scan_is_isolated() {
    let store = people_store(20);
    let harness = PopulationHarness::with_locks(
        Arc::clone(&store),
        Arc::new(NoLocks),
        EntityType::Node,
        PopulationConfig::new().batch_size(4).queue_threshold(1),
    );
    let failing = RecordingIndex::new();
    // The twelve people in chunks up to 12..=15 fit; the drained update does not.
    harness.add_populator(
        1,
        person_name_schema(),
        RecordingPopulator::new(IndexId::new(1), failing.clone()).fail_after(12),
    );
    let healthy = harness.add_index(2, person_name_schema());

    let writer = harness.writer();
    harness.before_read(move |start| {
        if start == EntityId::new(8) {
            writer.set(9, NAME, "renamed").unwrap();
        }
    });
    let summary = harness.run().unwrap();

    assert_eq!(state(&harness, 1), PopulationState::Failed);
    assert_eq!(state(&harness, 2), PopulationState::Online);
    assert_eq!(summary.failed(), 1);
    assert!(failing.failure().unwrap().contains("entry limit of 12"));
    assert_eq!(failing.delivered().len(), 12);
    assert_eq!(harness.failures.failures_for(IndexId::new(1)), 1);

    // The sibling drained the same update once the scan covered entity 9.
    let counters = summary.report(IndexId::new(2)).unwrap().counters;
    assert_eq!(counters.updates_queued, 1);
    assert_eq!(counters.updates_drained, 1);
    assert_eq!(healthy.entries(), expected_entries(store.as_ref(), &person_name_schema()));
}

#[test]
fn close_and_flip_failures_fail_the_population() {
    let store = people_store(8);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let unclosable = RecordingIndex::new();
    harness.add_populator(
        1,
        person_name_schema(),
        RecordingPopulator::new(IndexId::new(1), unclosable.clone()).fail_on_close(),
    );
    harness.add_with_target(
        2,
        person_age_schema(),
        RecordingPopulator::new(IndexId::new(2), RecordingIndex::new()),
        Arc::new(RecordingFlipTarget::failing()),
    );
    harness.add_index(3, company_name_schema());

    let summary = harness.run().unwrap();

    assert_eq!(state(&harness, 1), PopulationState::Failed);
    assert_eq!(state(&harness, 2), PopulationState::Failed);
    assert_eq!(state(&harness, 3), PopulationState::Online);
    assert_eq!(summary.failed(), 2);
    assert_eq!(unclosable.closed(), Some(true));
    assert_eq!(harness.flip_target.flipped(), vec![IndexId::new(3)]);
}

#[test]
fn creates_and_deletes_during_scan_match_rebuild() {
    let store = people_store(20);
    let harness = PopulationHarness::new(Arc::clone(&store));
    let names = harness.add_index(1, person_name_schema());
    let ages = harness.add_index(2, person_age_schema());

    let writer = harness.writer();
    harness.before_read(move |start| match start.as_u64() {
        8 => {
            writer.delete(2).unwrap();
            writer.delete(13).unwrap();
            writer.create(person_or_company(30)).unwrap();
            writer.create(person_or_company(4)).unwrap();
        }
        // Deleting 13 shifts the chunk after this one to 12..=16.
        12 => {
            writer.set(9, AGE, 41_i64).unwrap();
            writer.unset(18, AGE).unwrap();
            writer.label(3, PERSON).unwrap();
        }
        _ => {}
    });

    harness.run().unwrap();

    assert_eq!(names.entries(), expected_entries(store.as_ref(), &person_name_schema()));
    assert_eq!(ages.entries(), expected_entries(store.as_ref(), &person_age_schema()));
    assert!(names.entries().contains_key(&EntityId::new(30)));
    assert!(!names.entries().contains_key(&EntityId::new(13)));
}

#[test]
fn relationship_indexes_populate_from_relationship_store() {
    let store = InMemoryStore::new();
    for id in 0..10 {
        let mut rel = EntityRecord::relationship(EntityId::new(id), KNOWS);
        if id % 2 == 0 {
            rel.set_property(SINCE, 2000 + id as i64);
        }
        store.insert(rel);
    }
    let store = Arc::new(store);
    let harness = PopulationHarness::with_locks(
        Arc::clone(&store),
        Arc::new(graphkern_core::NoLocks),
        EntityType::Relationship,
        PopulationConfig::new().batch_size(3),
    );
    let since = harness.add_index(1, knows_since_schema());

    harness.run().unwrap();

    assert_eq!(since.entries().len(), 5);
    assert_eq!(since.entries(), expected_entries(store.as_ref(), &knows_since_schema()));
}

#[test]
fn flip_is_deferred_on_lock_timeout_and_retried() {
    let store = people_store(12);
    let manager = LockManager::with_config(
        LockConfig::new().acquisition_timeout(Duration::from_millis(20)),
        Arc::new(SystemClock::new()),
    );
    let harness = PopulationHarness::with_locks(
        Arc::clone(&store),
        Arc::new(manager.client()),
        EntityType::Node,
        PopulationConfig::new().batch_size(4),
    );
    let names = harness.add_index(1, person_name_schema());

    let blocker = manager.client();
    blocker
        .acquire_exclusive(ResourceType::Schema, 1)
        .unwrap();

    let summary = harness.run().unwrap();
    assert_eq!(state(&harness, 1), PopulationState::Populating);
    match &summary.reports[0].outcome {
        PopulationOutcome::Pending { reason: Some(reason) } => {
            assert!(reason.contains("timed out"), "{reason}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(summary.pending(), 1);
    assert!(harness.failures.failures().is_empty());

    // Still accepting: the scan is complete, so the update applies directly.
    harness.writer().set(5, NAME, "while-deferred").unwrap();

    blocker.release_exclusive(ResourceType::Schema, 1).unwrap();
    let summary = harness.populator.flip_after_population();
    assert_eq!(summary.online(), 1);
    assert_eq!(
        names.entries().get(&EntityId::new(5)),
        Some(&vec![Value::from("while-deferred")])
    );
    assert_eq!(names.entries(), expected_entries(store.as_ref(), &person_name_schema()));
}

#[test]
fn summary_serializes_to_json() {
    let harness = PopulationHarness::new(people_store(4));
    harness.add_index(1, person_name_schema());
    let summary = harness.run().unwrap();

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["reports"][0]["name"], "index_1");
    assert_eq!(json["reports"][0]["outcome"]["outcome"], "ONLINE");
    assert_eq!(json["reports"][0]["counters"]["scanned_entries"], 3);
    assert_eq!(json["scan"]["scanned"], 4);
}

/// Runs writes scheduled by chunk start id; leftovers run once the table is exhausted.
fn schedule(harness: &PopulationHarness, writes: Vec<(u64, WriteOp)>) {
    let writer = harness.writer();
    let inner = Arc::clone(&harness.store);
    let mut pending = writes;
    harness.before_read(move |start| {
        let exhausted = graphkern_core::StoreView::read_from(
            inner.as_ref(),
            EntityType::Node,
            start,
            1,
        )
        .map(|chunk| chunk.is_empty())
        .unwrap_or(true);
        let (now, later): (Vec<_>, Vec<_>) = pending
            .drain(..)
            .partition(|(at, _)| exhausted || *at <= start.as_u64());
        pending = later;
        for (_, op) in now {
            op.apply(&writer).unwrap();
        }
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn population_matches_rebuild_under_writes(
        nodes in store_strategy(40, 60),
        writes in scheduled_writes_strategy(60, 40),
        batch in 1usize..8,
        threshold in 0usize..4,
    ) {
        let store = build_store(nodes);
        let harness = PopulationHarness::with_locks(
            Arc::clone(&store),
            Arc::new(graphkern_core::NoLocks),
            EntityType::Node,
            PopulationConfig::new().batch_size(batch).queue_threshold(threshold),
        );
        let indexes = [
            (1, person_name_schema(), harness.add_index(1, person_name_schema())),
            (2, person_age_schema(), harness.add_index(2, person_age_schema())),
            (3, company_name_schema(), harness.add_index(3, company_name_schema())),
        ];
        schedule(&harness, writes);

        let summary = harness.run().unwrap();
        prop_assert_eq!(summary.online(), 3);

        for (id, schema, index) in &indexes {
            prop_assert_eq!(index.entries(), expected_entries(store.as_ref(), schema));

            // Every live update reached the builder exactly once.
            let counters = harness
                .populator
                .population_for(IndexId::new(*id))
                .unwrap()
                .progress();
            prop_assert_eq!(counters.queue_length, 0);
            prop_assert_eq!(counters.updates_drained, counters.updates_queued);
            prop_assert_eq!(
                index.delivered().len() as u64,
                counters.scanned_entries
                    + counters.updates_applied_directly
                    + counters.updates_drained
            );
        }
    }
}
