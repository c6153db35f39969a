//! Blocking shared/exclusive lock manager.

use crate::clock::{Clock, SystemClock};
use crate::config::LockConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockMode, Locks, ResourceType};
use crate::query::{ExecutionStatus, QueryStatus};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

type ClientId = u64;
type ResourceKey = (ResourceType, u64);

/// Holds on one resource.
#[derive(Debug, Default)]
struct ResourceLock {
    /// Exclusive owner and its reentrancy count.
    exclusive: Option<(ClientId, u32)>,
    /// Shared owners and their reentrancy counts.
    shared: HashMap<ClientId, u32>,
}

impl ResourceLock {
    fn compatible(&self, mode: LockMode, client: ClientId) -> bool {
        let exclusive_ok = self.exclusive.map_or(true, |(owner, _)| owner == client);
        match mode {
            LockMode::Shared => exclusive_ok,
            LockMode::Exclusive => exclusive_ok && self.shared.keys().all(|c| *c == client),
        }
    }

    fn grant(&mut self, mode: LockMode, client: ClientId) {
        match mode {
            LockMode::Shared => *self.shared.entry(client).or_insert(0) += 1,
            LockMode::Exclusive => match &mut self.exclusive {
                Some((_, count)) => *count += 1,
                None => self.exclusive = Some((client, 1)),
            },
        }
    }

    fn release(&mut self, mode: LockMode, client: ClientId) -> bool {
        match mode {
            LockMode::Shared => match self.shared.get_mut(&client) {
                Some(count) => {
                    *count -= 1;
                    if *count == 0 {
                        self.shared.remove(&client);
                    }
                    true
                }
                None => false,
            },
            LockMode::Exclusive => match &mut self.exclusive {
                Some((owner, count)) if *owner == client => {
                    *count -= 1;
                    if *count == 0 {
                        self.exclusive = None;
                    }
                    true
                }
                _ => false,
            },
        }
    }

    fn release_all(&mut self, client: ClientId) -> bool {
        let mut changed = self.shared.remove(&client).is_some();
        if matches!(self.exclusive, Some((owner, _)) if owner == client) {
            self.exclusive = None;
            changed = true;
        }
        changed
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

/// Grants shared and exclusive locks keyed by `(resource type, resource id)`.
///
/// Locks are owned by [`LockClient`]s. Holds are reentrant per client, and a
/// client that is the only shared holder may also take the exclusive lock.
///
/// # Example
///
/// ```rust
/// use graphkern_core::{LockManager, Locks, ResourceType};
///
/// let manager = LockManager::new();
/// let client = manager.client();
/// client.acquire_exclusive(ResourceType::Schema, 1).unwrap();
/// assert!(manager.is_locked(ResourceType::Schema, 1));
/// client.release_exclusive(ResourceType::Schema, 1).unwrap();
/// assert!(!manager.is_locked(ResourceType::Schema, 1));
/// ```
pub struct LockManager {
    config: LockConfig,
    clock: Arc<dyn Clock>,
    table: Mutex<HashMap<ResourceKey, ResourceLock>>,
    released: Condvar,
    next_client: AtomicU64,
}

impl LockManager {
    /// Creates a manager with default configuration and a system clock.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_config(LockConfig::default(), Arc::new(SystemClock::new()))
    }

    /// Creates a manager with the given configuration and wait clock.
    #[must_use]
    pub fn with_config(config: LockConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            table: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            next_client: AtomicU64::new(1),
        })
    }

    /// Opens a client with its own status tracker.
    #[must_use]
    pub fn client(self: &Arc<Self>) -> LockClient {
        self.client_with_status(Arc::new(ExecutionStatus::new()))
    }

    /// Opens a client that reports waits into `status`.
    #[must_use]
    pub fn client_with_status(self: &Arc<Self>, status: Arc<ExecutionStatus>) -> LockClient {
        LockClient {
            id: self.next_client.fetch_add(1, Ordering::Relaxed),
            manager: Arc::clone(self),
            status,
        }
    }

    /// Returns true if anyone holds a lock on the resource.
    #[must_use]
    pub fn is_locked(&self, resource_type: ResourceType, resource_id: u64) -> bool {
        self.table.lock().contains_key(&(resource_type, resource_id))
    }

    /// Number of resources with at least one hold.
    #[must_use]
    pub fn locked_resource_count(&self) -> usize {
        self.table.lock().len()
    }

    fn acquire(
        &self,
        client: &LockClient,
        mode: LockMode,
        resource_type: ResourceType,
        resource_id: u64,
    ) -> CoreResult<()> {
        let key = (resource_type, resource_id);
        let mut table = self.table.lock();

        let entry = table.entry(key).or_default();
        if entry.compatible(mode, client.id) {
            entry.grant(mode, client.id);
            return Ok(());
        }

        let previous = client.status.replace(QueryStatus::waiting(
            mode,
            resource_type,
            vec![resource_id],
            self.clock.nanos(),
        ));
        tracing::debug!(
            client = client.id,
            %mode,
            %resource_type,
            resource_id,
            "waiting for lock"
        );

        let deadline = self
            .config
            .acquisition_timeout
            .map(|timeout| Instant::now() + timeout);
        let result = loop {
            let timed_out = match deadline {
                Some(deadline) => self.released.wait_until(&mut table, deadline).timed_out(),
                None => {
                    self.released.wait(&mut table);
                    false
                }
            };

            let entry = table.entry(key).or_default();
            if entry.compatible(mode, client.id) {
                entry.grant(mode, client.id);
                break Ok(());
            }
            if timed_out {
                break Err(CoreError::LockTimeout {
                    mode,
                    resource_type,
                    resource_id,
                });
            }
        };
        drop(table);

        client.status.restore(previous);
        result
    }

    fn release(
        &self,
        client: &LockClient,
        mode: LockMode,
        resource_type: ResourceType,
        resource_id: u64,
    ) -> CoreResult<()> {
        let key = (resource_type, resource_id);
        let mut table = self.table.lock();

        let released = table
            .get_mut(&key)
            .is_some_and(|entry| entry.release(mode, client.id));
        if !released {
            return Err(CoreError::LockNotHeld {
                mode,
                resource_type,
                resource_id,
            });
        }

        if table.get(&key).is_some_and(ResourceLock::is_free) {
            table.remove(&key);
        }
        drop(table);
        self.released.notify_all();
        Ok(())
    }

    fn release_all(&self, client: ClientId) {
        let mut table = self.table.lock();
        let mut changed = false;
        table.retain(|_, entry| {
            changed |= entry.release_all(client);
            !entry.is_free()
        });
        drop(table);
        if changed {
            self.released.notify_all();
        }
    }
}

/// Lock handle of one execution context.
///
/// Dropping the client releases every lock it still holds.
pub struct LockClient {
    id: ClientId,
    manager: Arc<LockManager>,
    status: Arc<ExecutionStatus>,
}

impl LockClient {
    /// Client id, unique within its manager.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Status tracker this client reports waits into.
    #[must_use]
    pub fn status(&self) -> &Arc<ExecutionStatus> {
        &self.status
    }

    /// Releases every lock held by this client.
    pub fn release_all(&self) {
        self.manager.release_all(self.id);
    }
}

impl Locks for LockClient {
    fn acquire_exclusive(&self, resource_type: ResourceType, resource_id: u64) -> CoreResult<()> {
        self.manager
            .acquire(self, LockMode::Exclusive, resource_type, resource_id)
    }

    fn acquire_shared(&self, resource_type: ResourceType, resource_id: u64) -> CoreResult<()> {
        self.manager
            .acquire(self, LockMode::Shared, resource_type, resource_id)
    }

    fn release_exclusive(&self, resource_type: ResourceType, resource_id: u64) -> CoreResult<()> {
        self.manager
            .release(self, LockMode::Exclusive, resource_type, resource_id)
    }

    fn release_shared(&self, resource_type: ResourceType, resource_id: u64) -> CoreResult<()> {
        self.manager
            .release(self, LockMode::Shared, resource_type, resource_id)
    }
}

impl Drop for LockClient {
    fn drop(&mut self) {
        self.manager.release_all(self.id);
    }
}
