//! Capabilities injected into each index population.

use crate::error::{CoreError, CoreResult};
use crate::index::IndexEntryUpdate;
use crate::schema::IndexDescriptor;

/// Builder of one index's content.
///
/// One instance per population. Calls are serialized by the population, so
/// implementations need not be `Sync`.
pub trait IndexPopulator: Send {
    /// Prepares empty index storage.
    ///
    /// # Errors
    ///
    /// A failure here moves the population straight to FAILED.
    fn create(&mut self) -> CoreResult<()>;

    /// Applies scanned entries or live updates.
    ///
    /// Must tolerate receiving the same entry for an entity more than once
    /// (the scan's entry and a later change carrying the same values).
    ///
    /// # Errors
    ///
    /// A failure isolates this population as FAILED.
    fn add(&mut self, updates: &[IndexEntryUpdate]) -> CoreResult<()>;

    /// Finishes the build. `false` means the content must be discarded.
    ///
    /// # Errors
    ///
    /// A failure on `close(true)` isolates this population as FAILED.
    fn close(&mut self, populated_successfully: bool) -> CoreResult<()>;

    /// Records why the build failed, before `close(false)`.
    fn mark_as_failed(&mut self, _failure: &str) {}
}

/// The externally visible index that goes online once population is done.
pub trait FlipTarget: Send + Sync {
    /// Switches the index to online. Called under the exclusive schema lock.
    ///
    /// # Errors
    ///
    /// A failure isolates this population as FAILED.
    fn flip(&self, descriptor: &IndexDescriptor) -> CoreResult<()>;
}

/// Receives unrecoverable population failures.
pub trait FailureSink: Send + Sync {
    /// Called once when the population for `descriptor` becomes FAILED.
    fn population_failed(&self, descriptor: &IndexDescriptor, failure: &CoreError);
}
