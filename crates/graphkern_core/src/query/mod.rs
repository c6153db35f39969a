//! Execution status reporting.
//!
//! A [`QueryStatus`] says whether a statement (or a population job) is
//! running, planning, or waiting on a lock. It is consumed by inspection
//! tooling only; nothing in the population logic depends on it.

mod status;
mod tracker;

pub use status::{QueryStatus, StatusValue, WaitingOnLock};
pub use tracker::ExecutionStatus;
