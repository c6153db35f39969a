//! Stress tests for index population.
//!
//! Runs a population while writer threads modify the store under shared
//! schema locks, then compares every index against a from-scratch build.

use crate::fixtures::{
    company_name_schema, expected_entries, people_store, person_age_schema, person_name_schema,
    person_or_company, PopulationHarness, RecordingIndex, Writer, AGE, COMPANY, NAME, PERSON,
};
use graphkern_core::{
    CoreResult, EntityId, EntityRecord, EntityType, IndexId, InMemoryStore, LockManager,
    PopulationConfig, PopulationSummary, SchemaDescriptor, StoreView,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of writer threads.
    pub writers: usize,
    /// Writes per writer thread.
    pub writes_per_writer: usize,
    /// Nodes in the initial store.
    pub entities: u64,
    /// Scan batch size.
    pub batch_size: usize,
    /// Queue length that triggers an opportunistic drain.
    pub queue_threshold: usize,
    /// Pause before each chunk read, to widen the race window.
    pub chunk_delay: Duration,
    /// Base seed for the writers' random generators.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 4,
            writes_per_writer: 500,
            entities: 2_000,
            batch_size: 32,
            queue_threshold: 16,
            chunk_delay: Duration::from_micros(200),
            seed: 7,
        }
    }
}

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Writes attempted.
    pub writes: usize,
    /// Writes rejected (lock failures).
    pub failed_writes: usize,
    /// Wall time of the population.
    pub duration: Duration,
    /// Population outcome.
    pub summary: PopulationSummary,
    /// Indexes whose content differs from a from-scratch build.
    pub mismatches: Vec<IndexId>,
}

impl StressTestResult {
    /// Returns true if every index went online with exact content.
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty() && self.summary.online() == self.summary.reports.len()
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Writes: {} ({} failed)", self.writes, self.failed_writes);
        println!("Duration: {:?}", self.duration);
        println!("Online: {}/{}", self.summary.online(), self.summary.reports.len());
        println!("Mismatched indexes: {:?}", self.mismatches);
    }
}

/// Runs a three-index population over [`people_store`] while writers race it.
///
/// Writers take shared schema locks; the populator flips under exclusive
/// ones from the same [`LockManager`]. The scan waits for every writer
/// before its final read so that no write lands after a flip.
///
/// # Errors
///
/// Whatever the population returns.
pub fn stress_population_with_writers(config: &StressConfig) -> CoreResult<StressTestResult> {
    let store = people_store(config.entities);
    let manager = LockManager::new();
    let harness = PopulationHarness::with_locks(
        Arc::clone(&store),
        Arc::new(manager.client()),
        EntityType::Node,
        PopulationConfig::new()
            .batch_size(config.batch_size)
            .queue_threshold(config.queue_threshold),
    );

    let indexes: Vec<(IndexId, SchemaDescriptor, RecordingIndex)> = [
        (1, person_name_schema()),
        (2, person_age_schema()),
        (3, company_name_schema()),
    ]
    .into_iter()
    .map(|(id, schema)| (IndexId::new(id), schema.clone(), harness.add_index(id, schema)))
    .collect();

    let finished = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    {
        let finished = Arc::clone(&finished);
        let inner = Arc::clone(&store);
        let writers = config.writers;
        let delay = config.chunk_delay;
        harness.before_read(move |start| {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if first_id_from(&inner, start).is_none() {
                while finished.load(Ordering::Acquire) < writers {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        });
    }

    let start = Instant::now();
    let max_id = config.entities + config.entities / 4 + 1;
    let summary = thread::scope(|scope| {
        for n in 0..config.writers {
            let writer = harness.writer().with_locks(manager.client());
            let finished = Arc::clone(&finished);
            let failed = Arc::clone(&failed);
            let seed = config.seed.wrapping_add(n as u64);
            let writes = config.writes_per_writer;
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for i in 0..writes {
                    if random_write(&writer, &mut rng, max_id, n, i).is_err() {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                finished.fetch_add(1, Ordering::Release);
            });
        }
        harness.run()
    })?;
    let duration = start.elapsed();

    let mismatches: Vec<IndexId> = indexes
        .iter()
        .filter(|(_, schema, index)| index.entries() != expected_entries(store.as_ref(), schema))
        .map(|(id, ..)| *id)
        .collect();
    tracing::debug!(
        seed = config.seed,
        online = summary.online(),
        mismatched = mismatches.len(),
        ?duration,
        "stress population finished"
    );

    Ok(StressTestResult {
        writes: config.writers * config.writes_per_writer,
        failed_writes: failed.load(Ordering::Relaxed),
        duration,
        summary,
        mismatches,
    })
}

fn random_write(
    writer: &Writer,
    rng: &mut StdRng,
    max_id: u64,
    writer_no: usize,
    seq: usize,
) -> CoreResult<()> {
    let id = rng.gen_range(0..max_id);
    match rng.gen_range(0..10) {
        0..=3 => writer.set(id, NAME, format!("w{writer_no}-{seq}")).map(drop),
        4 | 5 => writer.set(id, AGE, rng.gen_range(18..90_i64)).map(drop),
        6 => writer.unset(id, AGE).map(drop),
        7 => {
            let label = if rng.gen_bool(0.5) { PERSON } else { COMPANY };
            writer.label(id, label).map(drop)
        }
        8 => writer.create(person_or_company(id)),
        _ => writer.delete(id).map(drop),
    }
}

fn first_id_from(store: &InMemoryStore, start: EntityId) -> Option<EntityId> {
    store
        .read_from(EntityType::Node, start, 1)
        .ok()
        .and_then(|chunk| chunk.first().map(EntityRecord::id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_stress_run_is_consistent() {
        let result = stress_population_with_writers(&StressConfig {
            writers: 2,
            writes_per_writer: 100,
            entities: 200,
            batch_size: 8,
            queue_threshold: 4,
            chunk_delay: Duration::from_micros(50),
            seed: 1,
        })
        .unwrap();
        assert!(result.is_consistent(), "mismatches: {:?}", result.mismatches);
        assert_eq!(result.failed_writes, 0);
    }
}
