//! Per-index population unit.
//!
//! An [`IndexPopulation`] wraps the builder of one index together with its
//! update queue and state machine:
//!
//! ```text
//! CREATING -> POPULATING -> FLIPPING -> ONLINE
//!     |            |  ^         |
//!     |            |  +---------+  (retryable lock failure)
//!     +------------+-----------+--> FAILED
//!     +------------+--> CANCELLED
//! ```
//!
//! # Invariants
//!
//! - FAILED, ONLINE and CANCELLED are terminal; nothing is queued or
//!   applied afterwards
//! - An update is queued only while the scan has not covered its entity;
//!   otherwise it is applied immediately, after any queued updates the scan
//!   now covers
//! - Lock order is queue, then builder; never the reverse

use crate::error::{CoreError, CoreResult};
use crate::index::{FailureSink, FlipTarget, IndexEntryUpdate, IndexPopulator};
use crate::lock::{LockGuard, Locks, ResourceType};
use crate::schema::IndexDescriptor;
use crate::store::ScanProgress;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable handle of a population inside its [`crate::MultipleIndexPopulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PopulationHandle(pub usize);

/// Lifecycle state of one population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PopulationState {
    /// Registered, builder not created yet.
    Creating,
    /// Receiving scanned entries and live updates.
    Populating,
    /// Draining and going online under the schema lock.
    Flipping,
    /// Online and queryable.
    Online,
    /// Failed; the cause is recorded.
    Failed,
    /// Dropped before completion.
    Cancelled,
}

impl PopulationState {
    /// Upper-case state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Populating => "POPULATING",
            Self::Flipping => "FLIPPING",
            Self::Online => "ONLINE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Returns true for states with no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Online | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the state machine has an edge `self -> next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Creating, Self::Populating)
                | (Self::Creating, Self::Failed)
                | (Self::Creating, Self::Cancelled)
                | (Self::Populating, Self::Flipping)
                | (Self::Populating, Self::Failed)
                | (Self::Populating, Self::Cancelled)
                | (Self::Flipping, Self::Online)
                | (Self::Flipping, Self::Failed)
                | (Self::Flipping, Self::Populating)
        )
    }
}

impl fmt::Display for PopulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of offering a live update to a population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Scan has not passed the entity yet; queued for drain.
    Queued,
    /// Scan already passed the entity; applied now.
    Applied,
    /// Population no longer accepts updates.
    Ignored,
}

/// Result of a flip attempt that did not fail the population.
#[derive(Debug, Clone)]
pub enum FlipResult {
    /// The index is online.
    Online,
    /// The schema lock could not be taken; back to POPULATING.
    Deferred(Arc<CoreError>),
}

#[derive(Debug, Default)]
struct UpdateQueue {
    accepting: bool,
    queued: VecDeque<IndexEntryUpdate>,
}

impl UpdateQueue {
    /// Removes, in order, every queued update whose entity the scan covers.
    fn take_covered(&mut self, progress: &ScanProgress) -> Vec<IndexEntryUpdate> {
        let mut covered = Vec::new();
        let mut pending = VecDeque::with_capacity(self.queued.len());
        for update in self.queued.drain(..) {
            if progress.covers(update.entity_id()) {
                covered.push(update);
            } else {
                pending.push_back(update);
            }
        }
        self.queued = pending;
        covered
    }
}

struct BuilderSlot {
    builder: Box<dyn IndexPopulator>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Counters {
    scanned: AtomicU64,
    queued: AtomicU64,
    applied_directly: AtomicU64,
    drained: AtomicU64,
}

/// Counts for one population, for inspection endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PopulationCounters {
    /// Entries produced by the scan and handed to the builder.
    pub scanned_entries: u64,
    /// Live updates that went into the queue.
    pub updates_queued: u64,
    /// Live updates applied immediately.
    pub updates_applied_directly: u64,
    /// Queued updates applied by a drain.
    pub updates_drained: u64,
    /// Updates still waiting in the queue.
    pub queue_length: u64,
}

/// The unit of work building one index.
pub struct IndexPopulation {
    handle: PopulationHandle,
    descriptor: IndexDescriptor,
    user_description: String,
    builder: Mutex<BuilderSlot>,
    flip_target: Arc<dyn FlipTarget>,
    failure_sink: Arc<dyn FailureSink>,
    state: Mutex<PopulationState>,
    updates: Mutex<UpdateQueue>,
    failure: Mutex<Option<Arc<CoreError>>>,
    deferred: Mutex<Option<Arc<CoreError>>>,
    counters: Counters,
}

impl IndexPopulation {
    pub(crate) fn new(
        handle: PopulationHandle,
        builder: Box<dyn IndexPopulator>,
        descriptor: IndexDescriptor,
        flip_target: Arc<dyn FlipTarget>,
        failure_sink: Arc<dyn FailureSink>,
        user_description: String,
    ) -> Self {
        Self {
            handle,
            descriptor,
            user_description,
            builder: Mutex::new(BuilderSlot {
                builder,
                closed: false,
            }),
            flip_target,
            failure_sink,
            state: Mutex::new(PopulationState::Creating),
            updates: Mutex::new(UpdateQueue {
                accepting: true,
                queued: VecDeque::new(),
            }),
            failure: Mutex::new(None),
            deferred: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// Handle inside the owning populator.
    #[must_use]
    pub const fn handle(&self) -> PopulationHandle {
        self.handle
    }

    /// Descriptor of the index being built.
    #[must_use]
    pub const fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    /// Human readable description given at registration.
    #[must_use]
    pub fn user_description(&self) -> &str {
        &self.user_description
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PopulationState {
        *self.state.lock()
    }

    /// Cause of the failure, once FAILED.
    #[must_use]
    pub fn failure(&self) -> Option<Arc<CoreError>> {
        self.failure.lock().clone()
    }

    /// Why the last flip attempt was deferred, if it was.
    #[must_use]
    pub fn deferred_reason(&self) -> Option<Arc<CoreError>> {
        self.deferred.lock().clone()
    }

    /// Returns true while live updates are queued or applied.
    #[must_use]
    pub fn is_accepting_updates(&self) -> bool {
        self.updates.lock().accepting
    }

    /// Number of queued updates.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.updates.lock().queued.len()
    }

    /// Snapshot of this population's counters.
    #[must_use]
    pub fn progress(&self) -> PopulationCounters {
        PopulationCounters {
            scanned_entries: self.counters.scanned.load(Ordering::Relaxed),
            updates_queued: self.counters.queued.load(Ordering::Relaxed),
            updates_applied_directly: self.counters.applied_directly.load(Ordering::Relaxed),
            updates_drained: self.counters.drained.load(Ordering::Relaxed),
            queue_length: self.queue_len() as u64,
        }
    }

    pub(crate) fn transition(&self, next: PopulationState) -> CoreResult<()> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                index_id: self.descriptor.id(),
                from: state.name(),
                to: next.name(),
            });
        }
        *state = next;
        Ok(())
    }

    /// Runs the builder's creation hook.
    pub(crate) fn create(&self) -> CoreResult<()> {
        self.builder.lock().builder.create()
    }

    /// Hands a batch of scanned entries to the builder.
    pub(crate) fn add_scanned(&self, batch: &[IndexEntryUpdate]) -> CoreResult<()> {
        let mut slot = self.builder.lock();
        if slot.closed {
            return Ok(());
        }
        slot.builder.add(batch)?;
        self.counters
            .scanned
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Queues `update`, or applies it if the scan already covers its entity.
    pub(crate) fn offer(
        &self,
        update: IndexEntryUpdate,
        progress: &ScanProgress,
    ) -> CoreResult<Offer> {
        let mut queue = self.updates.lock();
        if !queue.accepting {
            return Ok(Offer::Ignored);
        }
        if !progress.covers(update.entity_id()) {
            queue.queued.push_back(update);
            self.counters.queued.fetch_add(1, Ordering::Relaxed);
            return Ok(Offer::Queued);
        }

        // Older queued updates for covered entities go first.
        let mut batch = queue.take_covered(progress);
        let drained = batch.len() as u64;
        batch.push(update);

        let mut slot = self.builder.lock();
        if slot.closed {
            return Ok(Offer::Ignored);
        }
        slot.builder.add(&batch)?;
        self.counters.drained.fetch_add(drained, Ordering::Relaxed);
        self.counters.applied_directly.fetch_add(1, Ordering::Relaxed);
        Ok(Offer::Applied)
    }

    /// Applies every queued update the scan now covers. Returns how many.
    pub(crate) fn drain_covered(&self, progress: &ScanProgress) -> CoreResult<usize> {
        let mut queue = self.updates.lock();
        let batch = queue.take_covered(progress);
        if batch.is_empty() {
            return Ok(0);
        }
        let mut slot = self.builder.lock();
        if slot.closed {
            return Ok(0);
        }
        slot.builder.add(&batch)?;
        self.counters
            .drained
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        tracing::debug!(index = %self.descriptor.id(), drained = batch.len(), "drained covered updates");
        Ok(batch.len())
    }

    /// Drains the queue and goes online under the exclusive schema lock.
    ///
    /// A retryable lock failure puts the population back to POPULATING and is
    /// reported as [`FlipResult::Deferred`]; any other error is returned for
    /// the caller to fail the population with.
    pub(crate) fn flip(&self, locks: &dyn Locks) -> CoreResult<FlipResult> {
        self.transition(PopulationState::Flipping)?;

        let index_id = self.descriptor.id();
        let _schema_lock = match LockGuard::exclusive(locks, ResourceType::Schema, index_id.as_u64())
        {
            Ok(guard) => guard,
            Err(e) if e.is_retryable() => {
                self.transition(PopulationState::Populating)?;
                let reason = Arc::new(e);
                *self.deferred.lock() = Some(Arc::clone(&reason));
                return Ok(FlipResult::Deferred(reason));
            }
            Err(e) => return Err(e),
        };

        let mut queue = self.updates.lock();
        let remaining: Vec<IndexEntryUpdate> = queue.queued.drain(..).collect();
        {
            let mut slot = self.builder.lock();
            if slot.closed {
                return Err(CoreError::invalid_operation(format!(
                    "index {index_id} builder closed before flip"
                )));
            }
            if !remaining.is_empty() {
                slot.builder.add(&remaining)?;
                self.counters
                    .drained
                    .fetch_add(remaining.len() as u64, Ordering::Relaxed);
            }
            slot.closed = true;
            slot.builder.close(true)?;
        }
        self.flip_target.flip(&self.descriptor)?;
        queue.accepting = false;
        self.transition(PopulationState::Online)?;
        *self.deferred.lock() = None;

        tracing::info!(
            index = %index_id,
            drained = remaining.len(),
            "index population flipped online"
        );
        Ok(FlipResult::Online)
    }

    /// Moves to FAILED, discards the build and notifies the failure sink.
    ///
    /// Returns false if the population had already reached a terminal state.
    pub(crate) fn fail(&self, failure: CoreError) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return false;
            }
            *state = PopulationState::Failed;
        }
        let failure = Arc::new(failure);
        *self.failure.lock() = Some(Arc::clone(&failure));

        self.stop_accepting();
        self.discard(Some(&failure.to_string()));

        tracing::warn!(
            index = %self.descriptor.id(),
            description = %self.user_description,
            error = %failure,
            "index population failed"
        );
        self.failure_sink
            .population_failed(&self.descriptor, &failure);
        true
    }

    /// Moves to CANCELLED and discards the build, without notifying the sink.
    ///
    /// Returns false unless the population was CREATING or POPULATING.
    pub(crate) fn cancel(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.can_transition_to(PopulationState::Cancelled) {
                return false;
            }
            *state = PopulationState::Cancelled;
        }
        self.stop_accepting();
        self.discard(None);
        tracing::info!(index = %self.descriptor.id(), "index population cancelled");
        true
    }

    fn stop_accepting(&self) {
        let mut queue = self.updates.lock();
        queue.accepting = false;
        queue.queued.clear();
    }

    fn discard(&self, failure: Option<&str>) {
        let mut slot = self.builder.lock();
        if slot.closed {
            return;
        }
        slot.closed = true;
        if let Some(failure) = failure {
            slot.builder.mark_as_failed(failure);
        }
        if let Err(e) = slot.builder.close(false) {
            tracing::warn!(
                index = %self.descriptor.id(),
                error = %e,
                "failed to close index builder"
            );
        }
    }
}

impl fmt::Debug for IndexPopulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexPopulation")
            .field("handle", &self.handle)
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
