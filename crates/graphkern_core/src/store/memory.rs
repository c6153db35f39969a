//! In-memory store for tests and tooling.

use crate::error::CoreResult;
use crate::store::{EntityRecord, StoreView};
use crate::types::{EntityId, EntityType};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory entity store.
///
/// Nodes and relationships live in separate ordered maps. Reads by a scan
/// only hold the read lock for one chunk, so writers interleave freely.
///
/// # Example
///
/// ```rust
/// use graphkern_core::{EntityId, EntityRecord, EntityType, InMemoryStore, LabelId, StoreView};
///
/// let store = InMemoryStore::new();
/// store.insert(EntityRecord::node(EntityId::new(1), [LabelId::new(1)]));
/// let chunk = store.read_from(EntityType::Node, EntityId::new(0), 10).unwrap();
/// assert_eq!(chunk.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    nodes: RwLock<BTreeMap<EntityId, EntityRecord>>,
    relationships: RwLock<BTreeMap<EntityId, EntityRecord>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, entity_type: EntityType) -> &RwLock<BTreeMap<EntityId, EntityRecord>> {
        match entity_type {
            EntityType::Node => &self.nodes,
            EntityType::Relationship => &self.relationships,
        }
    }

    /// Inserts or replaces a record, returning the previous version.
    pub fn insert(&self, record: EntityRecord) -> Option<EntityRecord> {
        self.table(record.entity_type())
            .write()
            .insert(record.id(), record)
    }

    /// Returns a copy of the current version of an entity.
    #[must_use]
    pub fn get(&self, entity_type: EntityType, id: EntityId) -> Option<EntityRecord> {
        self.table(entity_type).read().get(&id).cloned()
    }

    /// Mutates an entity in place, returning its `(before, after)` versions.
    ///
    /// Returns `None` if the entity does not exist.
    pub fn update<F>(
        &self,
        entity_type: EntityType,
        id: EntityId,
        mutate: F,
    ) -> Option<(EntityRecord, EntityRecord)>
    where
        F: FnOnce(&mut EntityRecord),
    {
        let mut table = self.table(entity_type).write();
        let record = table.get_mut(&id)?;
        let before = record.clone();
        mutate(record);
        Some((before, record.clone()))
    }

    /// Removes an entity, returning its last version.
    pub fn remove(&self, entity_type: EntityType, id: EntityId) -> Option<EntityRecord> {
        self.table(entity_type).write().remove(&id)
    }

    /// Number of stored entities of `entity_type`.
    #[must_use]
    pub fn len(&self, entity_type: EntityType) -> usize {
        self.table(entity_type).read().len()
    }

    /// Returns true if no entity of `entity_type` is stored.
    #[must_use]
    pub fn is_empty(&self, entity_type: EntityType) -> bool {
        self.len(entity_type) == 0
    }
}

impl StoreView for InMemoryStore {
    fn read_from(
        &self,
        entity_type: EntityType,
        start: EntityId,
        limit: usize,
    ) -> CoreResult<Vec<EntityRecord>> {
        let table = self.table(entity_type).read();
        Ok(table
            .range(start..)
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn estimated_count(&self, entity_type: EntityType) -> u64 {
        self.len(entity_type) as u64
    }
}
