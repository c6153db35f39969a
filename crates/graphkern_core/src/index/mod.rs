//! Online index population.
//!
//! Indexes are built from a single pass over the store while concurrent
//! writers keep modifying it. Each index is populated by its own
//! [`IndexPopulation`]; a [`MultipleIndexPopulator`] drives all of them
//! from one [`crate::store::EntityStoreScan`].
//!
//! # Correctness
//!
//! When population finishes, every index equals a from-scratch build of
//! the store as of the flip:
//!
//! - an update for an entity the scan has not passed is queued; the scan
//!   will read the entity's latest state and the queue is drained later
//! - an update for an entity the scan already passed is applied at once
//! - the flip drains whatever is left under an exclusive schema lock, so
//!   writers holding a shared schema lock cannot slip in between
//!
//! Builders must therefore accept the same entry for an entity twice.

mod population;
mod populator;
mod traits;
mod update;

pub use population::{
    IndexPopulation, Offer, PopulationCounters, PopulationHandle, PopulationState,
};
pub use populator::{
    MultipleIndexPopulator, PopulationOutcome, PopulationReport, PopulationScan,
    PopulationSummary,
};
pub use traits::{FailureSink, FlipTarget, IndexPopulator};
pub use update::{IndexEntryUpdate, UpdateKind};
