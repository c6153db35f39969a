//! Entity records produced by the store.

use crate::types::{EntityId, EntityType, LabelId, PropertyKeyId};
use crate::value::Value;
use std::collections::BTreeMap;

/// A point-in-time view of one node or relationship.
///
/// For nodes `tokens` are labels; for relationships it holds the single
/// relationship type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    id: EntityId,
    entity_type: EntityType,
    tokens: Vec<LabelId>,
    properties: BTreeMap<PropertyKeyId, Value>,
}

impl EntityRecord {
    /// Creates a node record with the given labels and no properties.
    pub fn node(id: EntityId, labels: impl IntoIterator<Item = LabelId>) -> Self {
        let mut tokens: Vec<LabelId> = labels.into_iter().collect();
        tokens.sort_unstable();
        tokens.dedup();
        Self {
            id,
            entity_type: EntityType::Node,
            tokens,
            properties: BTreeMap::new(),
        }
    }

    /// Creates a relationship record of the given type and no properties.
    #[must_use]
    pub fn relationship(id: EntityId, rel_type: LabelId) -> Self {
        Self {
            id,
            entity_type: EntityType::Relationship,
            tokens: vec![rel_type],
            properties: BTreeMap::new(),
        }
    }

    /// Adds or replaces a property.
    #[must_use]
    pub fn with_property(mut self, key: PropertyKeyId, value: impl Into<Value>) -> Self {
        self.properties.insert(key, value.into());
        self
    }

    /// Sets a property, returning the previous value.
    pub fn set_property(&mut self, key: PropertyKeyId, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(key, value.into())
    }

    /// Removes a property, returning the previous value.
    pub fn remove_property(&mut self, key: PropertyKeyId) -> Option<Value> {
        self.properties.remove(&key)
    }

    /// Adds a label. No-op for relationships.
    pub fn add_label(&mut self, label: LabelId) {
        if self.entity_type == EntityType::Node {
            if let Err(pos) = self.tokens.binary_search(&label) {
                self.tokens.insert(pos, label);
            }
        }
    }

    /// Entity id.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Entity type.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Labels or relationship type, sorted.
    #[must_use]
    pub fn tokens(&self) -> &[LabelId] {
        &self.tokens
    }

    /// Returns true if the entity carries `token`.
    #[must_use]
    pub fn has_token(&self, token: LabelId) -> bool {
        self.tokens.binary_search(&token).is_ok()
    }

    /// Looks up a property value.
    #[must_use]
    pub fn property(&self, key: PropertyKeyId) -> Option<&Value> {
        self.properties.get(&key)
    }

    /// Iterates properties in key order.
    pub fn properties(&self) -> impl Iterator<Item = (PropertyKeyId, &Value)> {
        self.properties.iter().map(|(k, v)| (*k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_sorted_and_deduplicated() {
        let mut node = EntityRecord::node(
            EntityId::new(1),
            [LabelId::new(3), LabelId::new(1), LabelId::new(3)],
        );
        assert_eq!(node.tokens(), &[LabelId::new(1), LabelId::new(3)]);

        node.add_label(LabelId::new(2));
        assert_eq!(
            node.tokens(),
            &[LabelId::new(1), LabelId::new(2), LabelId::new(3)]
        );
    }

    #[test]
    fn relationship_ignores_labels() {
        let mut rel = EntityRecord::relationship(EntityId::new(9), LabelId::new(4));
        rel.add_label(LabelId::new(5));
        assert_eq!(rel.tokens(), &[LabelId::new(4)]);
        assert!(rel.has_token(LabelId::new(4)));
    }

    #[test]
    fn property_roundtrip() {
        let mut node = EntityRecord::node(EntityId::new(1), [])
            .with_property(PropertyKeyId::new(1), "a");
        assert_eq!(
            node.set_property(PropertyKeyId::new(1), "b"),
            Some(Value::from("a"))
        );
        assert_eq!(node.property(PropertyKeyId::new(1)), Some(&Value::from("b")));
        assert_eq!(node.remove_property(PropertyKeyId::new(1)), Some(Value::from("b")));
        assert_eq!(node.properties().count(), 0);
    }
}
