//! Schema and index descriptors.
//!
//! A [`SchemaDescriptor`] is the join key between scanned entities, live
//! updates and the populations that care about them.

use crate::store::EntityRecord;
use crate::types::{EntityType, IndexId, LabelId, PropertyKeyId};
use crate::value::Value;
use serde::Serialize;
use std::fmt;

/// The schema an index covers: one label or relationship type and an
/// ordered list of property keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SchemaDescriptor {
    entity_type: EntityType,
    entity_token: LabelId,
    property_keys: Vec<PropertyKeyId>,
}

impl SchemaDescriptor {
    /// Schema over nodes with `label`.
    pub fn for_label(label: LabelId, property_keys: impl IntoIterator<Item = PropertyKeyId>) -> Self {
        Self {
            entity_type: EntityType::Node,
            entity_token: label,
            property_keys: property_keys.into_iter().collect(),
        }
    }

    /// Schema over relationships of type `rel_type`.
    pub fn for_relationship_type(
        rel_type: LabelId,
        property_keys: impl IntoIterator<Item = PropertyKeyId>,
    ) -> Self {
        Self {
            entity_type: EntityType::Relationship,
            entity_token: rel_type,
            property_keys: property_keys.into_iter().collect(),
        }
    }

    /// Entity type covered.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Label or relationship type covered.
    #[must_use]
    pub const fn entity_token(&self) -> LabelId {
        self.entity_token
    }

    /// Indexed property keys, in index key order.
    #[must_use]
    pub fn property_keys(&self) -> &[PropertyKeyId] {
        &self.property_keys
    }

    /// Returns true if the entity carries the token and every indexed key.
    #[must_use]
    pub fn matches(&self, entity: &EntityRecord) -> bool {
        entity.has_token(self.entity_token)
            && self
                .property_keys
                .iter()
                .all(|key| entity.property(*key).is_some())
    }

    /// Extracts the indexed values from an entity, in key order.
    ///
    /// Returns `None` if the entity does not match this schema.
    #[must_use]
    pub fn values_of(&self, entity: &EntityRecord) -> Option<Vec<Value>> {
        if !entity.has_token(self.entity_token) {
            return None;
        }
        self.property_keys
            .iter()
            .map(|key| entity.property(*key).cloned())
            .collect()
    }
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .property_keys
            .iter()
            .map(|k| k.as_u32().to_string())
            .collect();
        match self.entity_type {
            EntityType::Node => write!(f, ":label[{}]({})", self.entity_token.0, keys.join(",")),
            EntityType::Relationship => {
                write!(f, "-[:type[{}]]-({})", self.entity_token.0, keys.join(","))
            }
        }
    }
}

/// An index identified by its internal id and the schema it covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IndexDescriptor {
    id: IndexId,
    schema: SchemaDescriptor,
    name: String,
    unique: bool,
}

impl IndexDescriptor {
    /// Creates a descriptor for a non-unique index.
    pub fn new(id: IndexId, schema: SchemaDescriptor, name: impl Into<String>) -> Self {
        Self {
            id,
            schema,
            name: name.into(),
            unique: false,
        }
    }

    /// Marks the index as a uniqueness constraint index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Internal id of the index.
    #[must_use]
    pub const fn id(&self) -> IndexId {
        self.id
    }

    /// Schema covered by the index.
    #[must_use]
    pub const fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    /// Index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the index enforces uniqueness.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }
}

impl fmt::Display for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Index( {}, '{}', {} )", self.id, self.name, self.schema)
    }
}
