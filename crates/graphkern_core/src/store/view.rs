//! Store view trait definition.

use crate::error::CoreResult;
use crate::store::EntityRecord;
use crate::types::{EntityId, EntityType};

/// Read access to the primary store, as needed by a population scan.
///
/// # Invariants
///
/// - `read_from` returns entities with `id >= start` in ascending id order
/// - Every entity that exists for the whole duration of a scan is returned
///   by exactly one `read_from` call of that scan
/// - Implementations must be `Send + Sync`; writers keep writing while a
///   scan is reading
pub trait StoreView: Send + Sync {
    /// Reads up to `limit` entities of `entity_type` whose id is `>= start`.
    ///
    /// An empty result means the store is exhausted past `start`.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or corruption. The scan treats any
    /// error as fatal for every population it drives.
    fn read_from(
        &self,
        entity_type: EntityType,
        start: EntityId,
        limit: usize,
    ) -> CoreResult<Vec<EntityRecord>>;

    /// Approximate number of entities of `entity_type`, for progress reporting.
    fn estimated_count(&self, entity_type: EntityType) -> u64;
}
