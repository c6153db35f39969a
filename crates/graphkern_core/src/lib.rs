//! # Graphkern Core
//!
//! Online index population for graph storage.
//!
//! This crate provides:
//! - Multi-index population from a single store scan, concurrent with writers
//! - A per-index population state machine with failure isolation
//! - A lock coordinator with shared and exclusive resource locks
//! - Query status tracking for statements waiting on locks
//!
//! ## Example
//!
//! ```rust
//! use graphkern_core::{
//!     CoreResult, EntityId, EntityRecord, EntityType, FailureSink, FlipTarget,
//!     IndexDescriptor, IndexEntryUpdate, IndexId, IndexPopulator, InMemoryStore, LabelId,
//!     MultipleIndexPopulator, NoLocks, PopulationConfig, PropertyKeyId, SchemaDescriptor,
//!     CoreError,
//! };
//! use std::sync::Arc;
//!
//! struct Discard;
//!
//! impl IndexPopulator for Discard {
//!     fn create(&mut self) -> CoreResult<()> { Ok(()) }
//!     fn add(&mut self, _: &[IndexEntryUpdate]) -> CoreResult<()> { Ok(()) }
//!     fn close(&mut self, _: bool) -> CoreResult<()> { Ok(()) }
//! }
//!
//! impl FlipTarget for Discard {
//!     fn flip(&self, _: &IndexDescriptor) -> CoreResult<()> { Ok(()) }
//! }
//!
//! impl FailureSink for Discard {
//!     fn population_failed(&self, _: &IndexDescriptor, _: &CoreError) {}
//! }
//!
//! let store = Arc::new(InMemoryStore::new());
//! store.insert(
//!     EntityRecord::node(EntityId::new(0), [LabelId::new(1)])
//!         .with_property(PropertyKeyId::new(1), "Ada"),
//! );
//!
//! let populator = Arc::new(MultipleIndexPopulator::new(
//!     store,
//!     Arc::new(NoLocks),
//!     EntityType::Node,
//!     PopulationConfig::default(),
//! ));
//! let schema = SchemaDescriptor::for_label(LabelId::new(1), [PropertyKeyId::new(1)]);
//! populator
//!     .add_populator(
//!         Box::new(Discard),
//!         IndexDescriptor::new(IndexId::new(1), schema, "person_name"),
//!         Arc::new(Discard),
//!         Arc::new(Discard),
//!         "Index( :Person(name) )",
//!     )
//!     .unwrap();
//! populator.create();
//!
//! let summary = populator.index_all_entities().unwrap().run().unwrap();
//! assert_eq!(summary.online(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
pub mod index;
pub mod lock;
pub mod query;
mod schema;
pub mod store;
mod types;
mod value;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{LockConfig, PopulationConfig};
pub use error::{CoreError, CoreResult};
pub use index::{
    FailureSink, FlipTarget, IndexEntryUpdate, IndexPopulation, IndexPopulator,
    MultipleIndexPopulator, Offer, PopulationCounters, PopulationHandle, PopulationOutcome,
    PopulationReport, PopulationScan, PopulationState, PopulationSummary, UpdateKind,
};
pub use lock::{LockClient, LockGuard, LockManager, LockMode, Locks, NoLocks, ResourceType};
pub use query::{ExecutionStatus, QueryStatus, StatusValue, WaitingOnLock};
pub use schema::{IndexDescriptor, SchemaDescriptor};
pub use store::{
    EntityFilter, EntityRecord, EntityStoreScan, EntityVisitor, InMemoryStore, ScanControl,
    ScanOutcome, ScanProgress, ScanProgressSnapshot, StoreView,
};
pub use types::{EntityId, EntityType, IndexId, LabelId, PropertyKeyId};
pub use value::Value;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
