//! Multi-index population.
//!
//! A [`MultipleIndexPopulator`] builds several indexes from one pass over the
//! store while writers keep writing:
//!
//! 1. `add_populator` registers one [`IndexPopulation`] per index
//! 2. `create` runs every builder's creation hook
//! 3. `index_all_entities` prepares a single [`EntityStoreScan`] over the
//!    union of all schemas; `PopulationScan::run` performs it and fans each
//!    entity out to the populations whose schema it matches
//! 4. `queue_update` is called by the write path at any time; each update
//!    is queued or applied depending on whether the scan has passed its entity
//! 5. After the scan each surviving population drains its queue and flips
//!    online under an exclusive schema lock
//!
//! A failing population is isolated: it becomes FAILED and the rest carry on.
//! A failing scan fails every population still in progress.

use crate::config::PopulationConfig;
use crate::error::{CoreError, CoreResult};
use crate::index::population::{FlipResult, IndexPopulation, PopulationHandle, PopulationState};
use crate::index::{FailureSink, FlipTarget, IndexEntryUpdate, IndexPopulator, PopulationCounters};
use crate::lock::Locks;
use crate::schema::IndexDescriptor;
use crate::store::{
    EntityFilter, EntityRecord, EntityStoreScan, EntityVisitor, ScanControl, ScanOutcome,
    ScanProgress, ScanProgressSnapshot, StoreView,
};
use crate::types::{EntityId, EntityType, IndexId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Coordinates the population of several indexes over one store scan.
pub struct MultipleIndexPopulator {
    job_id: Uuid,
    entity_type: EntityType,
    store: Arc<dyn StoreView>,
    locks: Arc<dyn Locks>,
    config: PopulationConfig,
    /// Arena of populations. Entries are never removed; terminal state is the tombstone.
    populations: RwLock<Vec<Arc<IndexPopulation>>>,
    progress: Arc<ScanProgress>,
    scan: Mutex<Option<Arc<EntityStoreScan>>>,
    scan_running: AtomicBool,
}

impl MultipleIndexPopulator {
    /// Creates a populator for indexes over `entity_type`.
    pub fn new(
        store: Arc<dyn StoreView>,
        locks: Arc<dyn Locks>,
        entity_type: EntityType,
        config: PopulationConfig,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            entity_type,
            store,
            locks,
            config,
            populations: RwLock::new(Vec::new()),
            progress: Arc::new(ScanProgress::new()),
            scan: Mutex::new(None),
            scan_running: AtomicBool::new(false),
        }
    }

    /// Id used to correlate this job's log output.
    #[must_use]
    pub const fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Entity type scanned.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Registers a new index population in state CREATING.
    ///
    /// # Errors
    ///
    /// Fails once `index_all_entities` has been called, or if the index
    /// covers another entity type.
    pub fn add_populator(
        &self,
        populator: Box<dyn IndexPopulator>,
        descriptor: IndexDescriptor,
        flip_target: Arc<dyn FlipTarget>,
        failure_sink: Arc<dyn FailureSink>,
        user_description: impl Into<String>,
    ) -> CoreResult<Arc<IndexPopulation>> {
        // Held until the push so `index_all_entities` cannot build its filter in between.
        let scan = self.scan.lock();
        if scan.is_some() {
            return Err(CoreError::invalid_operation(
                "cannot add a population after the store scan started",
            ));
        }
        if descriptor.schema().entity_type() != self.entity_type {
            return Err(CoreError::invalid_operation(format!(
                "{descriptor} does not index {} entities",
                self.entity_type
            )));
        }

        let mut populations = self.populations.write();
        let population = Arc::new(IndexPopulation::new(
            PopulationHandle(populations.len()),
            populator,
            descriptor,
            flip_target,
            failure_sink,
            user_description.into(),
        ));
        populations.push(Arc::clone(&population));
        drop(scan);
        Ok(population)
    }

    /// Runs the creation hook of every CREATING population.
    ///
    /// A population whose hook fails becomes FAILED; the others still proceed.
    pub fn create(&self) {
        for population in self.snapshot() {
            if population.state() != PopulationState::Creating {
                continue;
            }
            let created = population
                .create()
                .and_then(|()| population.transition(PopulationState::Populating));
            match created {
                Ok(()) => tracing::info!(
                    job = %self.job_id,
                    index = %population.descriptor().id(),
                    description = %population.user_description(),
                    "index population started"
                ),
                Err(e) => {
                    population.fail(e);
                }
            }
        }
    }

    /// Prepares the shared store scan. The returned handle runs it.
    ///
    /// # Errors
    ///
    /// [`CoreError::ScanAlreadyStarted`] on a second call;
    /// [`CoreError::InvalidOperation`] while a population is still CREATING.
    pub fn index_all_entities(self: &Arc<Self>) -> CoreResult<PopulationScan> {
        let mut slot = self.scan.lock();
        if slot.is_some() {
            return Err(CoreError::ScanAlreadyStarted);
        }

        let mut filter = EntityFilter::new(self.entity_type);
        for population in self.populations.read().iter() {
            match population.state() {
                PopulationState::Creating => {
                    return Err(CoreError::invalid_operation(format!(
                        "{} has not been created",
                        population.descriptor()
                    )));
                }
                PopulationState::Populating => filter.include(population.descriptor().schema()),
                _ => {}
            }
        }

        let scan = Arc::new(EntityStoreScan::new(
            Arc::clone(&self.store),
            filter,
            self.config.batch_size,
            Arc::clone(&self.progress),
        ));
        *slot = Some(Arc::clone(&scan));
        Ok(PopulationScan {
            populator: Arc::clone(self),
            scan,
        })
    }

    /// Routes a live update to every population over its schema.
    ///
    /// Never waits on the lock coordinator. An update the scan has not passed
    /// yet is queued; otherwise it is applied right away.
    pub fn queue_update(&self, update: IndexEntryUpdate) {
        let populations = self.populations.read();
        let targets: Vec<&Arc<IndexPopulation>> = populations
            .iter()
            .filter(|p| p.descriptor().schema() == update.schema())
            .collect();

        let Some((last, rest)) = targets.split_last() else {
            return;
        };
        for population in rest {
            self.offer(population, update.clone());
        }
        self.offer(last, update);
    }

    /// Routes a batch of live updates, in order.
    pub fn queue_updates(&self, updates: impl IntoIterator<Item = IndexEntryUpdate>) {
        for update in updates {
            self.queue_update(update);
        }
    }

    fn offer(&self, population: &IndexPopulation, update: IndexEntryUpdate) {
        if let Err(e) = population.offer(update, &self.progress) {
            population.fail(e);
        }
    }

    /// Drains and flips every POPULATING population.
    ///
    /// Called by [`PopulationScan::run`] after the scan; call it again to
    /// retry flips deferred by a lock timeout.
    pub fn flip_after_population(&self) -> PopulationSummary {
        for population in self.snapshot() {
            if population.state() != PopulationState::Populating {
                continue;
            }
            match population.flip(self.locks.as_ref()) {
                Ok(FlipResult::Online) => {}
                Ok(FlipResult::Deferred(reason)) => tracing::warn!(
                    job = %self.job_id,
                    index = %population.descriptor().id(),
                    error = %reason,
                    "flip deferred"
                ),
                Err(e) => {
                    population.fail(e);
                }
            }
        }
        self.summary()
    }

    /// Requests cancellation of the whole job.
    ///
    /// A running scan stops at its next entity and cancels what is left when
    /// it returns; otherwise every unfinished population is cancelled now.
    pub fn cancel(&self) {
        self.progress.cancel();
        if !self.scan_running.load(Ordering::Acquire) {
            self.cancel_remaining();
        }
    }

    /// Cancels one population (its index was dropped). Siblings are unaffected.
    ///
    /// Returns false if the handle is unknown or the population is past
    /// POPULATING.
    pub fn cancel_population(&self, handle: PopulationHandle) -> bool {
        self.population(handle).is_some_and(|p| p.cancel())
    }

    fn cancel_remaining(&self) {
        for population in self.snapshot() {
            population.cancel();
        }
    }

    fn fail_remaining(&self, failure: &CoreError) {
        for population in self.snapshot() {
            if !population.state().is_terminal() {
                population.fail(failure.clone());
            }
        }
    }

    /// Looks up a population by handle.
    #[must_use]
    pub fn population(&self, handle: PopulationHandle) -> Option<Arc<IndexPopulation>> {
        self.populations.read().get(handle.0).cloned()
    }

    /// Looks up a population by index id.
    #[must_use]
    pub fn population_for(&self, index_id: IndexId) -> Option<Arc<IndexPopulation>> {
        self.populations
            .read()
            .iter()
            .find(|p| p.descriptor().id() == index_id)
            .cloned()
    }

    /// All registered populations, including terminal ones.
    #[must_use]
    pub fn populations(&self) -> Vec<Arc<IndexPopulation>> {
        self.snapshot()
    }

    /// Returns true while any population is not in a terminal state.
    #[must_use]
    pub fn has_active_populations(&self) -> bool {
        self.populations
            .read()
            .iter()
            .any(|p| !p.state().is_terminal())
    }

    /// Progress of the shared scan.
    #[must_use]
    pub fn progress(&self) -> ScanProgressSnapshot {
        self.progress.snapshot()
    }

    /// Outcome of every population so far.
    #[must_use]
    pub fn summary(&self) -> PopulationSummary {
        let reports = self
            .snapshot()
            .iter()
            .map(|p| PopulationReport {
                index_id: p.descriptor().id(),
                name: p.descriptor().name().to_owned(),
                description: p.user_description().to_owned(),
                outcome: PopulationOutcome::of(p),
                counters: p.progress(),
            })
            .collect();
        PopulationSummary {
            job_id: self.job_id,
            scan: self.progress.snapshot(),
            reports,
        }
    }

    fn snapshot(&self) -> Vec<Arc<IndexPopulation>> {
        self.populations.read().clone()
    }
}

/// Handle returned by [`MultipleIndexPopulator::index_all_entities`].
pub struct PopulationScan {
    populator: Arc<MultipleIndexPopulator>,
    scan: Arc<EntityStoreScan>,
}

impl PopulationScan {
    /// Scans the store, feeds every population, then drains and flips them.
    ///
    /// # Errors
    ///
    /// [`CoreError::ScanAlreadyStarted`] on a second call. A store failure
    /// fails every population still in progress and is returned.
    pub fn run(&self) -> CoreResult<PopulationSummary> {
        let populator = &self.populator;
        let span = tracing::info_span!("index_population", job = %populator.job_id);
        let _entered = span.enter();

        populator.scan_running.store(true, Ordering::Release);
        let mut visitor = PopulationVisitor::new(populator);
        tracing::info!(
            populations = visitor.batches.len(),
            entity_type = %populator.entity_type,
            "store scan started"
        );
        let outcome = self.scan.run(&mut visitor);
        populator.scan_running.store(false, Ordering::Release);

        match outcome {
            Err(CoreError::ScanAlreadyStarted) => Err(CoreError::ScanAlreadyStarted),
            Err(e) => {
                tracing::error!(error = %e, "store scan failed");
                populator.fail_remaining(&e);
                Err(e)
            }
            Ok(ScanOutcome::Cancelled) => {
                tracing::warn!("store scan cancelled");
                populator.cancel_remaining();
                Ok(populator.summary())
            }
            Ok(outcome) => {
                tracing::info!(
                    ?outcome,
                    scanned = populator.progress.snapshot().scanned,
                    "store scan completed"
                );
                if populator.progress.is_cancelled() {
                    populator.cancel_remaining();
                    return Ok(populator.summary());
                }
                Ok(populator.flip_after_population())
            }
        }
    }

    /// Requests early termination of the scan.
    pub fn cancel(&self) {
        self.populator.cancel();
    }

    /// Progress of the scan.
    #[must_use]
    pub fn progress(&self) -> ScanProgressSnapshot {
        self.scan.progress().snapshot()
    }
}

/// Feeds scanned entities to the populations, one batch per population.
struct PopulationVisitor<'a> {
    populator: &'a MultipleIndexPopulator,
    batches: Vec<(Arc<IndexPopulation>, Vec<IndexEntryUpdate>)>,
    visited: u64,
}

impl<'a> PopulationVisitor<'a> {
    fn new(populator: &'a MultipleIndexPopulator) -> Self {
        let batches = populator
            .snapshot()
            .into_iter()
            .filter(|p| p.state() == PopulationState::Populating)
            .map(|p| (p, Vec::with_capacity(populator.config.batch_size)))
            .collect();
        Self {
            populator,
            batches,
            visited: 0,
        }
    }
}

impl EntityVisitor for PopulationVisitor<'_> {
    fn visit(&mut self, entity: &EntityRecord) -> CoreResult<()> {
        for (population, batch) in &mut self.batches {
            let schema = population.descriptor().schema();
            if let Some(values) = schema.values_of(entity) {
                batch.push(IndexEntryUpdate::add(entity.id(), schema.clone(), values));
            }
        }

        self.visited += 1;
        let every = self.populator.config.print_progress_every;
        if every > 0 && self.visited % every == 0 {
            tracing::debug!(
                visited = self.visited,
                entity = %entity.id(),
                "population progress"
            );
        }
        Ok(())
    }

    fn chunk_completed(&mut self, last: EntityId) -> CoreResult<ScanControl> {
        let progress = &self.populator.progress;
        let threshold = self.populator.config.queue_threshold;

        for (population, batch) in &mut self.batches {
            if population.state() != PopulationState::Populating {
                batch.clear();
                continue;
            }
            if !batch.is_empty() {
                let added = population.add_scanned(batch);
                batch.clear();
                if let Err(e) = added {
                    population.fail(e);
                    continue;
                }
            }
            if threshold > 0 && population.queue_len() >= threshold {
                if let Err(e) = population.drain_covered(progress) {
                    population.fail(e);
                }
            }
        }

        tracing::trace!(last = %last, "chunk applied");
        // Drop tombstones so later chunks skip them cheaply.
        self.batches
            .retain(|(p, _)| p.state() == PopulationState::Populating);
        if self.batches.is_empty() {
            tracing::warn!("no population left to feed, stopping scan");
            return Ok(ScanControl::Stop);
        }
        Ok(ScanControl::Continue)
    }
}

/// Final or current outcome of one population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PopulationOutcome {
    /// Online and queryable.
    Online,
    /// Failed with the recorded cause.
    Failed {
        /// Cause of the failure.
        cause: String,
    },
    /// Cancelled before completion.
    Cancelled,
    /// Not finished; `reason` is set when a flip was deferred.
    Pending {
        /// Why the last flip was deferred.
        reason: Option<String>,
    },
}

impl PopulationOutcome {
    fn of(population: &IndexPopulation) -> Self {
        match population.state() {
            PopulationState::Online => Self::Online,
            PopulationState::Cancelled => Self::Cancelled,
            PopulationState::Failed => Self::Failed {
                cause: population
                    .failure()
                    .map(|e| e.to_string())
                    .unwrap_or_default(),
            },
            PopulationState::Creating | PopulationState::Populating | PopulationState::Flipping => {
                Self::Pending {
                    reason: population.deferred_reason().map(|e| e.to_string()),
                }
            }
        }
    }
}

/// Report line for one population.
#[derive(Debug, Clone, Serialize)]
pub struct PopulationReport {
    /// Index id.
    pub index_id: IndexId,
    /// Index name.
    pub name: String,
    /// Description given at registration.
    pub description: String,
    /// Outcome.
    pub outcome: PopulationOutcome,
    /// Counters at the time of the report.
    pub counters: PopulationCounters,
}

/// Outcome of a population job.
#[derive(Debug, Clone, Serialize)]
pub struct PopulationSummary {
    /// Job id.
    pub job_id: Uuid,
    /// Scan progress at the time of the report.
    pub scan: ScanProgressSnapshot,
    /// One report per registered population.
    pub reports: Vec<PopulationReport>,
}

impl PopulationSummary {
    /// Report for `index_id`.
    #[must_use]
    pub fn report(&self, index_id: IndexId) -> Option<&PopulationReport> {
        self.reports.iter().find(|r| r.index_id == index_id)
    }

    /// Number of populations that went online.
    #[must_use]
    pub fn online(&self) -> usize {
        self.count(|o| matches!(o, PopulationOutcome::Online))
    }

    /// Number of populations that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PopulationOutcome::Failed { .. }))
    }

    /// Number of populations not finished yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.count(|o| matches!(o, PopulationOutcome::Pending { .. }))
    }

    fn count(&self, pred: impl Fn(&PopulationOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}
