//! Property-based test generators using proptest.
//!
//! Provides strategies for stores and for sequences of writes that race a
//! population scan.

use crate::fixtures::{Writer, AGE, COMPANY, NAME, PERSON};
use graphkern_core::{CoreResult, EntityId, EntityRecord, InMemoryStore, LabelId, PropertyKeyId, Value};
use proptest::prelude::*;
use std::sync::Arc;

/// Strategy for indexable property values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..100).prop_map(Value::Integer),
        prop::string::string_regex("[a-e]{1,3}")
            .expect("Invalid regex")
            .prop_map(Value::Text),
        any::<bool>().prop_map(Value::Bool),
    ]
}

fn label_strategy() -> impl Strategy<Value = LabelId> {
    prop_oneof![Just(PERSON), Just(COMPANY)]
}

fn key_strategy() -> impl Strategy<Value = PropertyKeyId> {
    prop_oneof![Just(NAME), Just(AGE)]
}

/// Strategy for a node at `id` with random labels and properties.
pub fn node_strategy(id: u64) -> impl Strategy<Value = EntityRecord> {
    (
        prop::collection::vec(label_strategy(), 0..3),
        prop::option::of(value_strategy()),
        prop::option::of(value_strategy()),
    )
        .prop_map(move |(labels, name, age)| {
            let mut node = EntityRecord::node(EntityId::new(id), labels);
            if let Some(name) = name {
                node.set_property(NAME, name);
            }
            if let Some(age) = age {
                node.set_property(AGE, age);
            }
            node
        })
}

/// Strategy for a store of up to `max_nodes` nodes with sparse ids below `max_id`.
pub fn store_strategy(max_nodes: usize, max_id: u64) -> impl Strategy<Value = Vec<EntityRecord>> {
    prop::collection::btree_set(0..max_id, 0..max_nodes).prop_flat_map(|ids| {
        ids.into_iter()
            .map(node_strategy)
            .collect::<Vec<_>>()
    })
}

/// Builds an in-memory store holding `nodes`.
pub fn build_store(nodes: Vec<EntityRecord>) -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    for node in nodes {
        store.insert(node);
    }
    Arc::new(store)
}

/// A single write against a node store.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Set a property.
    Set(u64, PropertyKeyId, Value),
    /// Remove a property.
    Unset(u64, PropertyKeyId),
    /// Add a label.
    Label(u64, LabelId),
    /// Create or replace a node.
    Create(EntityRecord),
    /// Delete a node.
    Delete(u64),
}

impl WriteOp {
    /// Applies the write through `writer`.
    ///
    /// # Errors
    ///
    /// Lock failures from the writer.
    pub fn apply(&self, writer: &Writer) -> CoreResult<()> {
        match self {
            Self::Set(id, key, value) => writer.set(*id, *key, value.clone()).map(drop),
            Self::Unset(id, key) => writer.unset(*id, *key).map(drop),
            Self::Label(id, label) => writer.label(*id, *label).map(drop),
            Self::Create(entity) => writer.create(entity.clone()),
            Self::Delete(id) => writer.delete(*id).map(drop),
        }
    }

    /// Entity the write touches.
    pub fn entity(&self) -> u64 {
        match self {
            Self::Set(id, ..) | Self::Unset(id, _) | Self::Label(id, _) | Self::Delete(id) => *id,
            Self::Create(entity) => entity.id().as_u64(),
        }
    }
}

/// Strategy for one write to a node with id below `max_id`.
pub fn write_op_strategy(max_id: u64) -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        4 => (0..max_id, key_strategy(), value_strategy())
            .prop_map(|(id, key, value)| WriteOp::Set(id, key, value)),
        1 => (0..max_id, key_strategy()).prop_map(|(id, key)| WriteOp::Unset(id, key)),
        1 => (0..max_id, label_strategy()).prop_map(|(id, label)| WriteOp::Label(id, label)),
        2 => (0..max_id).prop_flat_map(node_strategy).prop_map(WriteOp::Create),
        1 => (0..max_id).prop_map(WriteOp::Delete),
    ]
}

/// Strategy for a sequence of writes, each tagged with the chunk start id
/// before whose read it happens.
pub fn scheduled_writes_strategy(
    max_id: u64,
    max_writes: usize,
) -> impl Strategy<Value = Vec<(u64, WriteOp)>> {
    prop::collection::vec((0..=max_id, write_op_strategy(max_id)), 0..max_writes)
}
