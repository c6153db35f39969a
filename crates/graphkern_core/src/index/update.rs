//! Index entry updates.

use crate::schema::SchemaDescriptor;
use crate::store::EntityRecord;
use crate::types::EntityId;
use crate::value::Value;

/// What an update does to one entity's entry in one index.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    /// The entity gained an entry.
    Added(Vec<Value>),
    /// The entity's indexed values changed.
    Changed {
        /// Values before the write.
        before: Vec<Value>,
        /// Values after the write.
        after: Vec<Value>,
    },
    /// The entity lost its entry.
    Removed(Vec<Value>),
}

/// A change to the entry of one entity in every index over `schema`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntryUpdate {
    entity_id: EntityId,
    schema: SchemaDescriptor,
    kind: UpdateKind,
}

impl IndexEntryUpdate {
    /// An added entry.
    #[must_use]
    pub fn add(entity_id: EntityId, schema: SchemaDescriptor, values: Vec<Value>) -> Self {
        Self {
            entity_id,
            schema,
            kind: UpdateKind::Added(values),
        }
    }

    /// A changed entry.
    #[must_use]
    pub fn change(
        entity_id: EntityId,
        schema: SchemaDescriptor,
        before: Vec<Value>,
        after: Vec<Value>,
    ) -> Self {
        Self {
            entity_id,
            schema,
            kind: UpdateKind::Changed { before, after },
        }
    }

    /// A removed entry.
    #[must_use]
    pub fn remove(entity_id: EntityId, schema: SchemaDescriptor, values: Vec<Value>) -> Self {
        Self {
            entity_id,
            schema,
            kind: UpdateKind::Removed(values),
        }
    }

    /// Derives the update a write implies for `schema`.
    ///
    /// `before`/`after` are the entity versions around the write (`None` for
    /// creation or deletion). Returns `None` when the indexed values did not
    /// change.
    #[must_use]
    pub fn for_write(
        schema: &SchemaDescriptor,
        before: Option<&EntityRecord>,
        after: Option<&EntityRecord>,
    ) -> Option<Self> {
        let entity_id = after.or(before)?.id();
        let old = before.and_then(|e| schema.values_of(e));
        let new = after.and_then(|e| schema.values_of(e));
        match (old, new) {
            (None, Some(values)) => Some(Self::add(entity_id, schema.clone(), values)),
            (Some(values), None) => Some(Self::remove(entity_id, schema.clone(), values)),
            (Some(before), Some(after)) if before != after => {
                Some(Self::change(entity_id, schema.clone(), before, after))
            }
            _ => None,
        }
    }

    /// Entity the update targets.
    #[must_use]
    pub const fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Schema the update targets.
    #[must_use]
    pub const fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    /// The change itself.
    #[must_use]
    pub const fn kind(&self) -> &UpdateKind {
        &self.kind
    }

    /// Values the entity has in the index after this update, if any.
    #[must_use]
    pub fn values(&self) -> Option<&[Value]> {
        match &self.kind {
            UpdateKind::Added(values) | UpdateKind::Changed { after: values, .. } => Some(values),
            UpdateKind::Removed(_) => None,
        }
    }
}
