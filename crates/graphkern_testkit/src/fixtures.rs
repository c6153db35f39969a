//! Test fixtures and population helpers.
//!
//! Provides recording implementations of the population capabilities, a
//! store wrapper that can inject writes or failures between scan chunks,
//! and a harness that wires them to a [`MultipleIndexPopulator`].

use graphkern_core::{
    CoreError, CoreResult, EntityId, EntityRecord, EntityType, FailureSink, FlipTarget,
    IndexDescriptor, IndexEntryUpdate, IndexId, IndexPopulator, InMemoryStore, LabelId,
    LockClient, LockGuard, Locks, MultipleIndexPopulator, NoLocks, PopulationConfig,
    PopulationSummary, PropertyKeyId, ResourceType, SchemaDescriptor, StoreView, UpdateKind,
    Value,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Label of person nodes.
pub const PERSON: LabelId = LabelId::new(1);
/// Label of company nodes.
pub const COMPANY: LabelId = LabelId::new(2);
/// Relationship type between people.
pub const KNOWS: LabelId = LabelId::new(10);
/// `name` property key.
pub const NAME: PropertyKeyId = PropertyKeyId::new(1);
/// `age` property key.
pub const AGE: PropertyKeyId = PropertyKeyId::new(2);
/// `since` property key.
pub const SINCE: PropertyKeyId = PropertyKeyId::new(3);

/// `:Person(name)`.
pub fn person_name_schema() -> SchemaDescriptor {
    SchemaDescriptor::for_label(PERSON, [NAME])
}

/// `:Person(age)`.
pub fn person_age_schema() -> SchemaDescriptor {
    SchemaDescriptor::for_label(PERSON, [AGE])
}

/// `:Company(name)`.
pub fn company_name_schema() -> SchemaDescriptor {
    SchemaDescriptor::for_label(COMPANY, [NAME])
}

/// `-[:KNOWS]-(since)`.
pub fn knows_since_schema() -> SchemaDescriptor {
    SchemaDescriptor::for_relationship_type(KNOWS, [SINCE])
}

/// Builds a store with `count` nodes, ids `0..count`.
///
/// Every fourth node is a company, the rest are people. Every person has a
/// name; every third id also has an age.
pub fn people_store(count: u64) -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    for id in 0..count {
        store.insert(person_or_company(id));
    }
    Arc::new(store)
}

/// The node [`people_store`] puts at `id`.
pub fn person_or_company(id: u64) -> EntityRecord {
    let entity = EntityId::new(id);
    if id % 4 == 3 {
        return EntityRecord::node(entity, [COMPANY]).with_property(NAME, format!("company-{id}"));
    }
    let person = EntityRecord::node(entity, [PERSON]).with_property(NAME, format!("person-{id}"));
    if id % 3 == 0 {
        person.with_property(AGE, 20 + (id % 50) as i64)
    } else {
        person
    }
}

/// Reads every entity of `entity_type` from `store`, in id order.
pub fn all_entities(store: &dyn StoreView, entity_type: EntityType) -> Vec<EntityRecord> {
    let mut entities = Vec::new();
    let mut next = EntityId::new(0);
    loop {
        let chunk = match store.read_from(entity_type, next, 256) {
            Ok(chunk) => chunk,
            Err(_) => return entities,
        };
        let Some(last) = chunk.last().map(EntityRecord::id) else {
            return entities;
        };
        entities.extend(chunk);
        next = EntityId::new(last.as_u64() + 1);
    }
}

/// Content a from-scratch build of an index over `schema` would have.
pub fn expected_entries(
    store: &dyn StoreView,
    schema: &SchemaDescriptor,
) -> BTreeMap<EntityId, Vec<Value>> {
    all_entities(store, schema.entity_type())
        .iter()
        .filter_map(|e| schema.values_of(e).map(|values| (e.id(), values)))
        .collect()
}

/// What a [`RecordingPopulator`] has seen.
#[derive(Debug, Default)]
pub struct IndexContent {
    /// Whether `create` ran.
    pub created: bool,
    /// Current entries, with set semantics per entity.
    pub entries: BTreeMap<EntityId, Vec<Value>>,
    /// Every update delivered, in delivery order.
    pub delivered: Vec<IndexEntryUpdate>,
    /// Number of `add` calls.
    pub add_calls: usize,
    /// Argument of `close`, once called.
    pub closed: Option<bool>,
    /// Message passed to `mark_as_failed`.
    pub failure: Option<String>,
}

/// Shared view of the content built by one [`RecordingPopulator`].
#[derive(Debug, Clone, Default)]
pub struct RecordingIndex(Arc<Mutex<IndexContent>>);

impl RecordingIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entries.
    pub fn entries(&self) -> BTreeMap<EntityId, Vec<Value>> {
        self.0.lock().entries.clone()
    }

    /// Every update delivered so far.
    pub fn delivered(&self) -> Vec<IndexEntryUpdate> {
        self.0.lock().delivered.clone()
    }

    /// Kinds of the updates delivered for `entity`, in order.
    pub fn delivered_for(&self, entity: EntityId) -> Vec<UpdateKind> {
        self.0
            .lock()
            .delivered
            .iter()
            .filter(|u| u.entity_id() == entity)
            .map(|u| u.kind().clone())
            .collect()
    }

    /// Number of `add` calls.
    pub fn add_calls(&self) -> usize {
        self.0.lock().add_calls
    }

    /// Argument of `close`, once called.
    pub fn closed(&self) -> Option<bool> {
        self.0.lock().closed
    }

    /// Message passed to `mark_as_failed`, if any.
    pub fn failure(&self) -> Option<String> {
        self.0.lock().failure.clone()
    }

    /// Whether `create` ran.
    pub fn is_created(&self) -> bool {
        self.0.lock().created
    }
}

/// An index builder that records what it receives.
///
/// Can be told to fail on create, on close, or once a number of entries
/// has been delivered.
#[derive(Debug)]
pub struct RecordingPopulator {
    index_id: IndexId,
    index: RecordingIndex,
    fail_on_create: bool,
    fail_on_close: bool,
    fail_after: Option<usize>,
}

impl RecordingPopulator {
    /// Creates a builder for `index_id` that records into `index`.
    pub fn new(index_id: IndexId, index: RecordingIndex) -> Self {
        Self {
            index_id,
            index,
            fail_on_create: false,
            fail_on_close: false,
            fail_after: None,
        }
    }

    /// Fails `create`.
    pub fn fail_on_create(mut self) -> Self {
        self.fail_on_create = true;
        self
    }

    /// Fails `close(true)`.
    pub fn fail_on_close(mut self) -> Self {
        self.fail_on_close = true;
        self
    }

    /// Fails the `add` call that would take delivered entries past `entries`.
    pub fn fail_after(mut self, entries: usize) -> Self {
        self.fail_after = Some(entries);
        self
    }
}

impl IndexPopulator for RecordingPopulator {
    fn create(&mut self) -> CoreResult<()> {
        if self.fail_on_create {
            return Err(CoreError::index_population(
                self.index_id,
                "could not create index storage",
            ));
        }
        self.index.0.lock().created = true;
        Ok(())
    }

    fn add(&mut self, updates: &[IndexEntryUpdate]) -> CoreResult<()> {
        let mut content = self.index.0.lock();
        if let Some(limit) = self.fail_after {
            if content.delivered.len() + updates.len() > limit {
                return Err(CoreError::index_population(
                    self.index_id,
                    format!("entry limit of {limit} exceeded"),
                ));
            }
        }
        content.add_calls += 1;
        for update in updates {
            match update.kind() {
                UpdateKind::Added(values) | UpdateKind::Changed { after: values, .. } => {
                    content.entries.insert(update.entity_id(), values.clone());
                }
                UpdateKind::Removed(_) => {
                    content.entries.remove(&update.entity_id());
                }
            }
            content.delivered.push(update.clone());
        }
        Ok(())
    }

    fn close(&mut self, populated_successfully: bool) -> CoreResult<()> {
        self.index.0.lock().closed = Some(populated_successfully);
        if populated_successfully && self.fail_on_close {
            return Err(CoreError::index_population(
                self.index_id,
                "could not finish index storage",
            ));
        }
        Ok(())
    }

    fn mark_as_failed(&mut self, failure: &str) {
        self.index.0.lock().failure = Some(failure.to_owned());
    }
}

/// A flip target that records which indexes went online.
#[derive(Debug, Default)]
pub struct RecordingFlipTarget {
    flipped: Mutex<Vec<IndexId>>,
    failing: bool,
}

impl RecordingFlipTarget {
    /// Creates a target that accepts every flip.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a target that rejects every flip.
    pub fn failing() -> Self {
        Self {
            flipped: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    /// Indexes flipped, in order.
    pub fn flipped(&self) -> Vec<IndexId> {
        self.flipped.lock().clone()
    }
}

impl FlipTarget for RecordingFlipTarget {
    fn flip(&self, descriptor: &IndexDescriptor) -> CoreResult<()> {
        if self.failing {
            return Err(CoreError::index_population(
                descriptor.id(),
                "index proxy refused to flip",
            ));
        }
        self.flipped.lock().push(descriptor.id());
        Ok(())
    }
}

/// A failure sink that records every failure reported.
#[derive(Debug, Default)]
pub struct RecordingFailureSink {
    failures: Mutex<Vec<(IndexId, String)>>,
}

impl RecordingFailureSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures reported, in order.
    pub fn failures(&self) -> Vec<(IndexId, String)> {
        self.failures.lock().clone()
    }

    /// Failures reported for `index_id`.
    pub fn failures_for(&self, index_id: IndexId) -> usize {
        self.failures
            .lock()
            .iter()
            .filter(|(id, _)| *id == index_id)
            .count()
    }
}

impl FailureSink for RecordingFailureSink {
    fn population_failed(&self, descriptor: &IndexDescriptor, failure: &CoreError) {
        self.failures
            .lock()
            .push((descriptor.id(), failure.to_string()));
    }
}

/// Callback run before every chunk read, with the chunk's start id.
pub type ReadHook = Box<dyn FnMut(EntityId) + Send>;

/// Store wrapper that runs a hook before each chunk read and can fail reads.
///
/// The hook runs on the scan thread between chunks, which makes "a write
/// happens while the scan is at entity N" deterministic.
pub struct HookedStore {
    inner: Arc<InMemoryStore>,
    before_read: Mutex<Option<ReadHook>>,
    fail_from: Mutex<Option<EntityId>>,
    reads: AtomicUsize,
}

impl HookedStore {
    /// Wraps `inner` with no hook installed.
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            before_read: Mutex::new(None),
            fail_from: Mutex::new(None),
            reads: AtomicUsize::new(0),
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<InMemoryStore> {
        &self.inner
    }

    /// Installs `hook`, replacing any previous one.
    pub fn set_hook(&self, hook: impl FnMut(EntityId) + Send + 'static) {
        *self.before_read.lock() = Some(Box::new(hook));
    }

    /// Removes the hook.
    pub fn clear_hook(&self) {
        self.before_read.lock().take();
    }

    /// Makes every read starting at or after `start` fail.
    pub fn fail_reads_from(&self, start: EntityId) {
        *self.fail_from.lock() = Some(start);
    }

    /// Number of chunk reads so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl StoreView for HookedStore {
    fn read_from(
        &self,
        entity_type: EntityType,
        start: EntityId,
        limit: usize,
    ) -> CoreResult<Vec<EntityRecord>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = self.before_read.lock().as_mut() {
            hook(start);
        }
        if self.fail_from.lock().is_some_and(|from| start >= from) {
            return Err(CoreError::scan_failed(format!(
                "simulated read failure at {start}"
            )));
        }
        self.inner.read_from(entity_type, start, limit)
    }

    fn estimated_count(&self, entity_type: EntityType) -> u64 {
        self.inner.estimated_count(entity_type)
    }
}

/// A writer that commits to the store and then publishes index updates.
///
/// With a lock client it holds a shared schema lock on every index and an
/// exclusive lock on the entity while it writes and publishes, the way a
/// committing transaction would.
pub struct Writer {
    store: Arc<InMemoryStore>,
    populator: Arc<MultipleIndexPopulator>,
    locks: Option<LockClient>,
}

impl Writer {
    /// Creates a writer without locking.
    pub fn new(store: Arc<InMemoryStore>, populator: Arc<MultipleIndexPopulator>) -> Self {
        Self {
            store,
            populator,
            locks: None,
        }
    }

    /// Takes shared schema locks through `client` around every write.
    pub fn with_locks(mut self, client: LockClient) -> Self {
        self.locks = Some(client);
        self
    }

    /// Sets a property on a node. Returns false if the node does not exist.
    pub fn set(&self, id: u64, key: PropertyKeyId, value: impl Into<Value>) -> CoreResult<bool> {
        let value = value.into();
        self.modify(id, move |e| {
            e.set_property(key, value);
        })
    }

    /// Removes a property from a node.
    pub fn unset(&self, id: u64, key: PropertyKeyId) -> CoreResult<bool> {
        self.modify(id, move |e| {
            e.remove_property(key);
        })
    }

    /// Adds a label to a node.
    pub fn label(&self, id: u64, label: LabelId) -> CoreResult<bool> {
        self.modify(id, move |e| e.add_label(label))
    }

    /// Creates or replaces an entity.
    pub fn create(&self, entity: EntityRecord) -> CoreResult<()> {
        self.locked(entity.id(), || {
            let after = entity.clone();
            let before = self.store.insert(entity);
            self.publish(before.as_ref(), Some(&after));
        })
    }

    /// Deletes a node. Returns false if it did not exist.
    pub fn delete(&self, id: u64) -> CoreResult<bool> {
        self.locked(EntityId::new(id), || {
            let before = self.store.remove(EntityType::Node, EntityId::new(id));
            self.publish(before.as_ref(), None);
            before.is_some()
        })
    }

    fn modify(&self, id: u64, mutate: impl FnOnce(&mut EntityRecord)) -> CoreResult<bool> {
        self.locked(EntityId::new(id), || {
            match self.store.update(EntityType::Node, EntityId::new(id), mutate) {
                Some((before, after)) => {
                    self.publish(Some(&before), Some(&after));
                    true
                }
                None => false,
            }
        })
    }

    fn publish(&self, before: Option<&EntityRecord>, after: Option<&EntityRecord>) {
        let mut schemas: Vec<SchemaDescriptor> = Vec::new();
        for population in self.populator.populations() {
            let schema = population.descriptor().schema();
            if !schemas.contains(schema) {
                schemas.push(schema.clone());
            }
        }
        for schema in &schemas {
            if let Some(update) = IndexEntryUpdate::for_write(schema, before, after) {
                self.populator.queue_update(update);
            }
        }
    }

    fn locked<T>(&self, entity: EntityId, write: impl FnOnce() -> T) -> CoreResult<T> {
        let Some(client) = &self.locks else {
            return Ok(write());
        };
        let mut ids: Vec<u64> = self
            .populator
            .populations()
            .iter()
            .map(|p| p.descriptor().id().as_u64())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(LockGuard::shared(client, ResourceType::Schema, id)?);
        }
        guards.push(LockGuard::exclusive(
            client,
            ResourceType::Node,
            entity.as_u64(),
        )?);
        Ok(write())
    }
}

/// A populator over a [`HookedStore`] with recording capabilities.
pub struct PopulationHarness {
    /// The underlying store.
    pub store: Arc<InMemoryStore>,
    /// The store as seen by the scan.
    pub hooked: Arc<HookedStore>,
    /// The populator under test.
    pub populator: Arc<MultipleIndexPopulator>,
    /// Shared flip target.
    pub flip_target: Arc<RecordingFlipTarget>,
    /// Shared failure sink.
    pub failures: Arc<RecordingFailureSink>,
}

impl PopulationHarness {
    /// Node populator with no locking and a scan batch size of 4.
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self::with_locks(
            store,
            Arc::new(NoLocks),
            EntityType::Node,
            PopulationConfig::new().batch_size(4),
        )
    }

    /// Populator with the given lock service, entity type and configuration.
    pub fn with_locks(
        store: Arc<InMemoryStore>,
        locks: Arc<dyn Locks>,
        entity_type: EntityType,
        config: PopulationConfig,
    ) -> Self {
        let hooked = Arc::new(HookedStore::new(Arc::clone(&store)));
        let populator = Arc::new(MultipleIndexPopulator::new(
            Arc::clone(&hooked) as Arc<dyn StoreView>,
            locks,
            entity_type,
            config,
        ));
        Self {
            store,
            hooked,
            populator,
            flip_target: Arc::new(RecordingFlipTarget::new()),
            failures: Arc::new(RecordingFailureSink::new()),
        }
    }

    /// Registers a recording index over `schema`.
    pub fn add_index(&self, id: u64, schema: SchemaDescriptor) -> RecordingIndex {
        let index = RecordingIndex::new();
        self.add_populator(
            id,
            schema,
            RecordingPopulator::new(IndexId::new(id), index.clone()),
        );
        index
    }

    /// Registers `populator` for an index over `schema`.
    ///
    /// # Panics
    ///
    /// If the populator rejects the registration.
    pub fn add_populator(&self, id: u64, schema: SchemaDescriptor, populator: RecordingPopulator) {
        self.add_with_target(id, schema, populator, Arc::clone(&self.flip_target) as _);
    }

    /// Registers `populator` with its own flip target.
    ///
    /// # Panics
    ///
    /// If the populator rejects the registration.
    pub fn add_with_target(
        &self,
        id: u64,
        schema: SchemaDescriptor,
        populator: RecordingPopulator,
        flip_target: Arc<dyn FlipTarget>,
    ) {
        let descriptor = IndexDescriptor::new(IndexId::new(id), schema, format!("index_{id}"));
        let description = format!("{descriptor}");
        self.populator
            .add_populator(
                Box::new(populator),
                descriptor,
                flip_target,
                Arc::clone(&self.failures) as _,
                description,
            )
            .expect("population registration rejected");
    }

    /// A writer over this harness's store and populator.
    pub fn writer(&self) -> Writer {
        Writer::new(Arc::clone(&self.store), Arc::clone(&self.populator))
    }

    /// Runs `hook` before every chunk read of the scan.
    pub fn before_read(&self, hook: impl FnMut(EntityId) + Send + 'static) {
        self.hooked.set_hook(hook);
    }

    /// Creates, scans, drains and flips.
    ///
    /// # Errors
    ///
    /// Whatever the scan returns.
    pub fn run(&self) -> CoreResult<PopulationSummary> {
        self.populator.create();
        let scan = self.populator.index_all_entities();
        let result = scan.and_then(|scan| scan.run());
        self.hooked.clear_hook();
        result
    }
}
