//! CLI command implementations.

pub mod contention;
pub mod populate;
