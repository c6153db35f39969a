//! Single-pass store scan.
//!
//! An [`EntityStoreScan`] walks one entity table in ascending id order
//! exactly once, handing every entity that passes its [`EntityFilter`] to an
//! [`EntityVisitor`]. Progress is published through a shared
//! [`ScanProgress`], whose boundary tells concurrent writers whether the scan
//! has already passed a given entity.

use crate::error::{CoreError, CoreResult};
use crate::schema::SchemaDescriptor;
use crate::store::{EntityRecord, StoreView};
use crate::types::{EntityId, EntityType, LabelId, PropertyKeyId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Boundary value meaning "every id is covered".
const COVERS_ALL: u64 = u64::MAX;

/// Merged predicate of every schema a scan serves.
///
/// An entity passes if it has any of the tokens and any of the property keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFilter {
    entity_type: EntityType,
    tokens: BTreeSet<LabelId>,
    property_keys: BTreeSet<PropertyKeyId>,
}

impl EntityFilter {
    /// Creates an empty filter that accepts nothing.
    #[must_use]
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            tokens: BTreeSet::new(),
            property_keys: BTreeSet::new(),
        }
    }

    /// Unions `schema` into the filter. Schemas of another entity type are ignored.
    pub fn include(&mut self, schema: &SchemaDescriptor) {
        if schema.entity_type() != self.entity_type {
            return;
        }
        self.tokens.insert(schema.entity_token());
        self.property_keys.extend(schema.property_keys().iter().copied());
    }

    /// Entity type scanned.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Returns true if no schema has been included.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Returns true if the entity may be relevant to at least one schema.
    #[must_use]
    pub fn accepts(&self, entity: &EntityRecord) -> bool {
        entity.entity_type() == self.entity_type
            && entity.tokens().iter().any(|t| self.tokens.contains(t))
            && entity
                .properties()
                .any(|(key, _)| self.property_keys.contains(&key))
    }
}

/// Shared progress of one scan.
///
/// The boundary is per scan and shared by every population the scan feeds.
/// It only moves forward.
#[derive(Debug, Default)]
pub struct ScanProgress {
    /// 0 = nothing completed, n = ids `< n` completed, `COVERS_ALL` = done.
    boundary: AtomicU64,
    last_completed: AtomicU64,
    has_completed_any: AtomicBool,
    scanned: AtomicU64,
    total: AtomicU64,
    cancelled: AtomicBool,
}

impl ScanProgress {
    /// Creates progress for a scan that has not started.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the scan has already handed `id` to its populations
    /// (or will never visit it again).
    #[must_use]
    pub fn covers(&self, id: EntityId) -> bool {
        let boundary = self.boundary.load(Ordering::Acquire);
        boundary == COVERS_ALL || id.as_u64() < boundary
    }

    /// Highest entity id whose entries have been handed to every population.
    #[must_use]
    pub fn last_completed(&self) -> Option<EntityId> {
        if self.has_completed_any.load(Ordering::Acquire) {
            Some(EntityId::new(self.last_completed.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    /// Marks every id up to and including `id` as completed.
    pub(crate) fn advance(&self, id: EntityId) {
        self.last_completed.fetch_max(id.as_u64(), Ordering::AcqRel);
        self.has_completed_any.store(true, Ordering::Release);
        let next = id.as_u64().saturating_add(1);
        self.boundary.fetch_max(next, Ordering::AcqRel);
    }

    /// Marks the scan as finished: every id counts as covered from now on.
    pub(crate) fn complete(&self) {
        self.boundary.store(COVERS_ALL, Ordering::Release);
    }

    pub(crate) fn record_scanned(&self, count: u64) {
        self.scanned.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Requests that the scan stop at the next entity.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Takes a point-in-time snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> ScanProgressSnapshot {
        ScanProgressSnapshot {
            scanned: self.scanned.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            last_completed: self.last_completed().map(EntityId::as_u64),
            complete: self.boundary.load(Ordering::Acquire) == COVERS_ALL,
            cancelled: self.is_cancelled(),
        }
    }
}

/// Snapshot of [`ScanProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanProgressSnapshot {
    /// Entities read from the store so far.
    pub scanned: u64,
    /// Estimated number of entities in the table when the scan started.
    pub total: u64,
    /// Highest completed entity id.
    pub last_completed: Option<u64>,
    /// Whether the scan has finished.
    pub complete: bool,
    /// Whether cancellation was requested.
    pub cancelled: bool,
}

impl ScanProgressSnapshot {
    /// Completed fraction in `0.0..=1.0`.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.complete {
            1.0
        } else if self.total == 0 {
            0.0
        } else {
            (self.scanned as f64 / self.total as f64).min(1.0)
        }
    }
}

/// What the visitor wants after a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    /// Keep scanning.
    Continue,
    /// Nothing left to feed; stop early.
    Stop,
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The table was exhausted.
    Completed,
    /// The visitor asked to stop.
    Stopped,
    /// Cancellation was requested.
    Cancelled,
}

/// Push-style receiver of scanned entities.
pub trait EntityVisitor {
    /// Receives one entity that passed the filter.
    ///
    /// # Errors
    ///
    /// An error aborts the scan and is returned from [`EntityStoreScan::run`].
    fn visit(&mut self, entity: &EntityRecord) -> CoreResult<()>;

    /// Called after every chunk, before the boundary moves past `last`.
    ///
    /// Everything visited so far must be applied when this returns.
    ///
    /// # Errors
    ///
    /// An error aborts the scan.
    fn chunk_completed(&mut self, last: EntityId) -> CoreResult<ScanControl>;
}

/// One forward pass over an entity table.
pub struct EntityStoreScan {
    store: Arc<dyn StoreView>,
    filter: EntityFilter,
    chunk_size: usize,
    progress: Arc<ScanProgress>,
    started: AtomicBool,
}

impl EntityStoreScan {
    /// Creates a scan publishing into `progress`.
    pub fn new(
        store: Arc<dyn StoreView>,
        filter: EntityFilter,
        chunk_size: usize,
        progress: Arc<ScanProgress>,
    ) -> Self {
        Self {
            store,
            filter,
            chunk_size: chunk_size.max(1),
            progress,
            started: AtomicBool::new(false),
        }
    }

    /// Shared progress of this scan.
    #[must_use]
    pub fn progress(&self) -> &Arc<ScanProgress> {
        &self.progress
    }

    /// Requests early termination. Entities already delivered stay delivered.
    pub fn cancel(&self) {
        self.progress.cancel();
    }

    /// Runs the scan to exhaustion, cancellation or visitor stop.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ScanAlreadyStarted`] on a second call,
    /// [`CoreError::ScanFailed`] if the store fails, or whatever the visitor
    /// returns.
    pub fn run(&self, visitor: &mut dyn EntityVisitor) -> CoreResult<ScanOutcome> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(CoreError::ScanAlreadyStarted);
        }

        let entity_type = self.filter.entity_type();
        self.progress
            .set_total(self.store.estimated_count(entity_type));

        if self.filter.is_empty() {
            self.progress.complete();
            return Ok(ScanOutcome::Stopped);
        }

        let mut next = EntityId::new(0);
        loop {
            if self.progress.is_cancelled() {
                return Ok(ScanOutcome::Cancelled);
            }

            let chunk = self
                .store
                .read_from(entity_type, next, self.chunk_size)
                .map_err(|e| match e {
                    CoreError::ScanFailed { .. } => e,
                    other => CoreError::scan_failed(other.to_string()),
                })?;
            let Some(last) = chunk.last().map(EntityRecord::id) else {
                break;
            };

            for entity in &chunk {
                if self.progress.is_cancelled() {
                    return Ok(ScanOutcome::Cancelled);
                }
                if self.filter.accepts(entity) {
                    visitor.visit(entity)?;
                }
            }
            self.progress.record_scanned(chunk.len() as u64);

            let control = visitor.chunk_completed(last)?;
            self.progress.advance(last);
            if control == ScanControl::Stop {
                self.progress.complete();
                return Ok(ScanOutcome::Stopped);
            }

            match last.as_u64().checked_add(1) {
                Some(n) => next = EntityId::new(n),
                None => break,
            }
        }

        self.progress.complete();
        Ok(ScanOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use proptest::prelude::*;

    #[derive(Default)]
    struct Collect {
        seen: Vec<u64>,
        chunks: Vec<u64>,
        stop_after: Option<usize>,
    }

    impl EntityVisitor for Collect {
        fn visit(&mut self, entity: &EntityRecord) -> CoreResult<()> {
            self.seen.push(entity.id().as_u64());
            Ok(())
        }

        fn chunk_completed(&mut self, last: EntityId) -> CoreResult<ScanControl> {
            self.chunks.push(last.as_u64());
            match self.stop_after {
                Some(n) if self.chunks.len() >= n => Ok(ScanControl::Stop),
                _ => Ok(ScanControl::Continue),
            }
        }
    }

    fn schema() -> SchemaDescriptor {
        SchemaDescriptor::for_label(LabelId::new(1), [PropertyKeyId::new(1)])
    }

    fn store(n: u64) -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        for id in 0..n {
            let label = if id % 2 == 0 { 1 } else { 2 };
            store.insert(
                EntityRecord::node(EntityId::new(id), [LabelId::new(label)])
                    .with_property(PropertyKeyId::new(1), id as i64),
            );
        }
        Arc::new(store)
    }

    fn scan(store: Arc<InMemoryStore>, chunk: usize) -> EntityStoreScan {
        let mut filter = EntityFilter::new(EntityType::Node);
        filter.include(&schema());
        EntityStoreScan::new(store, filter, chunk, Arc::new(ScanProgress::new()))
    }

    #[test]
    fn visits_matching_entities_in_order() {
        let scan = scan(store(10), 3);
        let mut visitor = Collect::default();
        assert_eq!(scan.run(&mut visitor).unwrap(), ScanOutcome::Completed);
        assert_eq!(visitor.seen, vec![0, 2, 4, 6, 8]);
        assert_eq!(visitor.chunks, vec![2, 5, 8, 9]);

        let snapshot = scan.progress().snapshot();
        assert_eq!(snapshot.scanned, 10);
        assert_eq!(snapshot.total, 10);
        assert_eq!(snapshot.last_completed, Some(9));
        assert!(snapshot.complete);
        assert!((snapshot.fraction() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn not_restartable() {
        let scan = scan(store(2), 10);
        scan.run(&mut Collect::default()).unwrap();
        assert!(matches!(
            scan.run(&mut Collect::default()),
            Err(CoreError::ScanAlreadyStarted)
        ));
    }

    #[test]
    fn boundary_tracks_chunks() {
        let progress = ScanProgress::new();
        assert!(!progress.covers(EntityId::new(0)));
        assert_eq!(progress.last_completed(), None);

        progress.advance(EntityId::new(7));
        assert!(progress.covers(EntityId::new(7)));
        assert!(!progress.covers(EntityId::new(8)));

        // Never moves backwards.
        progress.advance(EntityId::new(3));
        assert_eq!(progress.last_completed(), Some(EntityId::new(7)));

        progress.complete();
        assert!(progress.covers(EntityId::new(u64::MAX)));
    }

    proptest! {
        #[test]
        fn boundary_covers_exactly_the_completed_prefix(
            advances in prop::collection::vec(0u64..1_000, 1..20),
            candidate in 0u64..1_100,
        ) {
            let progress = ScanProgress::new();
            for id in &advances {
                progress.advance(EntityId::new(*id));
            }
            let highest = advances.iter().copied().max().unwrap();
            prop_assert_eq!(progress.last_completed(), Some(EntityId::new(highest)));
            prop_assert_eq!(progress.covers(EntityId::new(candidate)), candidate <= highest);

            progress.complete();
            prop_assert!(progress.covers(EntityId::new(candidate)));
        }
    }

    #[test]
    fn visitor_stop_completes_boundary() {
        let scan = scan(store(10), 2);
        let mut visitor = Collect {
            stop_after: Some(1),
            ..Collect::default()
        };
        assert_eq!(scan.run(&mut visitor).unwrap(), ScanOutcome::Stopped);
        assert_eq!(visitor.seen, vec![0]);
        assert!(scan.progress().covers(EntityId::new(100)));
    }

    #[test]
    fn cancel_before_run() {
        let scan = scan(store(10), 2);
        scan.cancel();
        let mut visitor = Collect::default();
        assert_eq!(scan.run(&mut visitor).unwrap(), ScanOutcome::Cancelled);
        assert!(visitor.seen.is_empty());
        assert!(scan.progress().snapshot().cancelled);
    }

    #[test]
    fn empty_filter_stops_immediately() {
        let scan = EntityStoreScan::new(
            store(4),
            EntityFilter::new(EntityType::Node),
            2,
            Arc::new(ScanProgress::new()),
        );
        let mut visitor = Collect::default();
        assert_eq!(scan.run(&mut visitor).unwrap(), ScanOutcome::Stopped);
        assert!(visitor.chunks.is_empty());
    }

    #[test]
    fn filter_ignores_other_entity_types() {
        let mut filter = EntityFilter::new(EntityType::Relationship);
        filter.include(&schema());
        assert!(filter.is_empty());

        let rel = EntityRecord::relationship(EntityId::new(1), LabelId::new(1))
            .with_property(PropertyKeyId::new(1), 1_i64);
        filter.include(&SchemaDescriptor::for_relationship_type(
            LabelId::new(1),
            [PropertyKeyId::new(1)],
        ));
        assert!(filter.accepts(&rel));
    }
}
