//! Resource locks.
//!
//! The [`Locks`] trait is the contract population relies on: blocking
//! acquisition of shared or exclusive locks keyed by
//! `(resource type, resource id)`, with strictly paired releases.
//!
//! [`LockManager`] hands out one [`LockClient`] per execution context. A
//! client that has to wait publishes a WAITING [`crate::query::QueryStatus`]
//! for the duration of the wait.

mod guard;
mod manager;

pub use guard::LockGuard;
pub use manager::{LockClient, LockManager};

use crate::error::CoreResult;
use serde::Serialize;
use std::fmt;

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LockMode {
    /// Compatible with other shared locks on the same resource.
    Shared,
    /// Incompatible with any other lock on the same resource.
    Exclusive,
}

impl LockMode {
    /// Upper-case name used in status maps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Shared => "SHARED",
            Self::Exclusive => "EXCLUSIVE",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of resource a lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceType {
    /// A node, by id.
    Node,
    /// A relationship, by id.
    Relationship,
    /// Schema of an index, by index id. Taken exclusively to flip an index online.
    Schema,
    /// A label or relationship type token.
    Label,
    /// An index entry (uniqueness checks), by hashed value.
    IndexEntry,
}

impl ResourceType {
    /// Upper-case name used in status maps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Node => "NODE",
            Self::Relationship => "RELATIONSHIP",
            Self::Schema => "SCHEMA",
            Self::Label => "LABEL",
            Self::IndexEntry => "INDEX_ENTRY",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lock operations available to one execution context.
///
/// Acquisition blocks until the lock is compatible with every lock other
/// contexts hold on the resource. Every acquisition must be paired with a
/// release of the same mode; releasing a lock that is not held is an error.
pub trait Locks: Send + Sync {
    /// Takes an exclusive lock, blocking while any other context holds a lock.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::LockTimeout`] if a timeout is configured
    /// and elapses.
    fn acquire_exclusive(&self, resource_type: ResourceType, resource_id: u64) -> CoreResult<()>;

    /// Takes a shared lock, blocking while another context holds it exclusively.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::LockTimeout`] if a timeout is configured
    /// and elapses.
    fn acquire_shared(&self, resource_type: ResourceType, resource_id: u64) -> CoreResult<()>;

    /// Releases one exclusive hold.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::LockNotHeld`] if no exclusive hold exists.
    fn release_exclusive(&self, resource_type: ResourceType, resource_id: u64) -> CoreResult<()>;

    /// Releases one shared hold.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::LockNotHeld`] if no shared hold exists.
    fn release_shared(&self, resource_type: ResourceType, resource_id: u64) -> CoreResult<()>;
}

/// Lock service that grants everything immediately.
///
/// For single-threaded tooling and tests that do not exercise contention.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocks;

impl Locks for NoLocks {
    fn acquire_exclusive(&self, _: ResourceType, _: u64) -> CoreResult<()> {
        Ok(())
    }

    fn acquire_shared(&self, _: ResourceType, _: u64) -> CoreResult<()> {
        Ok(())
    }

    fn release_exclusive(&self, _: ResourceType, _: u64) -> CoreResult<()> {
        Ok(())
    }

    fn release_shared(&self, _: ResourceType, _: u64) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(LockMode::Exclusive.to_string(), "EXCLUSIVE");
        assert_eq!(LockMode::Shared.name(), "SHARED");
        assert_eq!(ResourceType::Schema.to_string(), "SCHEMA");
        assert_eq!(ResourceType::IndexEntry.name(), "INDEX_ENTRY");
    }

    #[test]
    fn no_locks_grants_everything() {
        let locks = NoLocks;
        locks.acquire_exclusive(ResourceType::Node, 1).unwrap();
        locks.acquire_exclusive(ResourceType::Node, 1).unwrap();
        locks.release_shared(ResourceType::Node, 1).unwrap();
    }
}
