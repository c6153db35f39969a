//! # Graphkern Testkit
//!
//! Test utilities for graphkern index population.
//!
//! This crate provides:
//! - Recording fixtures for index builders, flip targets and failure sinks
//! - A hooked store for injecting writes and failures mid-scan
//! - Property-based test generators using proptest
//! - Concurrent writer harnesses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use graphkern_testkit::prelude::*;
//!
//! #[test]
//! fn populates_people() {
//!     let store = people_store(100);
//!     let harness = PopulationHarness::new(store.clone());
//!     let person_name = harness.add_index(1, person_name_schema());
//!     let summary = harness.run().unwrap();
//!     assert_eq!(summary.online(), 1);
//!     assert_eq!(person_name.entries(), expected_entries(&store, &person_name_schema()));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
