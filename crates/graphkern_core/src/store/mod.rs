//! Store access used by index population.
//!
//! The physical store is an external collaborator; this module only defines
//! what population needs from it:
//!
//! - [`StoreView`]: ascending, exhaustive, chunked reads of one entity table
//! - [`EntityStoreScan`]: a single, cancelable, non-restartable pass
//! - [`ScanProgress`]: the shared boundary writers consult
//! - [`InMemoryStore`]: reference implementation for tests and tooling

mod memory;
mod record;
mod scan;
mod view;

pub use memory::InMemoryStore;
pub use record::EntityRecord;
pub use scan::{
    EntityFilter, EntityStoreScan, EntityVisitor, ScanControl, ScanOutcome, ScanProgress,
    ScanProgressSnapshot,
};
pub use view::StoreView;
