//! Scoped lock holds.

use crate::error::CoreResult;
use crate::lock::{LockMode, Locks, ResourceType};

/// Releases a lock taken through [`Locks`] when dropped.
///
/// Keeps acquire and release paired on every exit path, including early
/// returns with `?`.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    locks: &'a dyn Locks,
    mode: LockMode,
    resource_type: ResourceType,
    resource_id: u64,
}

impl<'a> LockGuard<'a> {
    /// Takes an exclusive lock held until the guard drops.
    ///
    /// # Errors
    ///
    /// Propagates the acquisition error; nothing is held in that case.
    pub fn exclusive(
        locks: &'a dyn Locks,
        resource_type: ResourceType,
        resource_id: u64,
    ) -> CoreResult<Self> {
        locks.acquire_exclusive(resource_type, resource_id)?;
        Ok(Self {
            locks,
            mode: LockMode::Exclusive,
            resource_type,
            resource_id,
        })
    }

    /// Takes a shared lock held until the guard drops.
    ///
    /// # Errors
    ///
    /// Propagates the acquisition error; nothing is held in that case.
    pub fn shared(
        locks: &'a dyn Locks,
        resource_type: ResourceType,
        resource_id: u64,
    ) -> CoreResult<Self> {
        locks.acquire_shared(resource_type, resource_id)?;
        Ok(Self {
            locks,
            mode: LockMode::Shared,
            resource_type,
            resource_id,
        })
    }

    /// Mode of the held lock.
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let released = match self.mode {
            LockMode::Exclusive => self
                .locks
                .release_exclusive(self.resource_type, self.resource_id),
            LockMode::Shared => self
                .locks
                .release_shared(self.resource_type, self.resource_id),
        };
        if let Err(e) = released {
            tracing::warn!(
                resource_type = %self.resource_type,
                resource_id = self.resource_id,
                error = %e,
                "failed to release lock"
            );
        }
    }
}
