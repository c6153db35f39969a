//! Benchmark utilities.

use graphkern_core::{
    CoreError, CoreResult, EntityId, EntityRecord, FailureSink, FlipTarget, IndexDescriptor,
    IndexEntryUpdate, IndexPopulator, InMemoryStore, LabelId, PropertyKeyId, SchemaDescriptor,
};
use rand::Rng;
use std::sync::Arc;

/// Label used by generated nodes.
pub const PERSON: LabelId = LabelId::new(1);
/// First generated property key.
pub const NAME: PropertyKeyId = PropertyKeyId::new(1);
/// Second generated property key.
pub const AGE: PropertyKeyId = PropertyKeyId::new(2);

/// Generate a store of `count` labelled nodes with random property values.
pub fn generate_store(count: u64) -> Arc<InMemoryStore> {
    let mut rng = rand::thread_rng();
    let store = InMemoryStore::new();
    for id in 0..count {
        store.insert(
            EntityRecord::node(EntityId::new(id), [PERSON])
                .with_property(NAME, format!("n{}", rng.gen::<u32>()))
                .with_property(AGE, rng.gen_range(0..100_i64)),
        );
    }
    Arc::new(store)
}

/// Schemas over the generated nodes, one per property key.
pub fn schemas() -> Vec<SchemaDescriptor> {
    vec![
        SchemaDescriptor::for_label(PERSON, [NAME]),
        SchemaDescriptor::for_label(PERSON, [AGE]),
        SchemaDescriptor::for_label(PERSON, [NAME, AGE]),
    ]
}

/// Index builder that only counts entries.
#[derive(Debug, Default)]
pub struct CountingPopulator {
    /// Entries received.
    pub entries: usize,
}

impl IndexPopulator for CountingPopulator {
    fn create(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn add(&mut self, updates: &[IndexEntryUpdate]) -> CoreResult<()> {
        self.entries += updates.len();
        Ok(())
    }

    fn close(&mut self, _populated_successfully: bool) -> CoreResult<()> {
        Ok(())
    }
}

/// Flip target and failure sink that do nothing.
#[derive(Debug, Default)]
pub struct NullProxy;

impl FlipTarget for NullProxy {
    fn flip(&self, _descriptor: &IndexDescriptor) -> CoreResult<()> {
        Ok(())
    }
}

impl FailureSink for NullProxy {
    fn population_failed(&self, _descriptor: &IndexDescriptor, _failure: &CoreError) {}
}
