//! Error types for graphkern core.

use crate::lock::{LockMode, ResourceType};
use crate::types::IndexId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in graphkern core operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// An index builder rejected an operation.
    #[error("population of index {index_id} failed: {message}")]
    IndexPopulation {
        /// The index whose builder failed.
        index_id: IndexId,
        /// Description of the failure.
        message: String,
    },

    /// The store scan failed (I/O, corruption).
    #[error("store scan failed: {message}")]
    ScanFailed {
        /// Description of the failure.
        message: String,
    },

    /// A scan was started more than once.
    #[error("store scan already started")]
    ScanAlreadyStarted,

    /// A population was asked to move between states that are not connected.
    #[error("illegal state transition for index {index_id}: {from} -> {to}")]
    InvalidStateTransition {
        /// The index whose state was being changed.
        index_id: IndexId,
        /// State before the attempted transition.
        from: &'static str,
        /// Requested state.
        to: &'static str,
    },

    /// Lock acquisition gave up after the configured timeout.
    #[error("timed out acquiring {mode} lock on {resource_type}({resource_id})")]
    LockTimeout {
        /// Requested mode.
        mode: LockMode,
        /// Resource type.
        resource_type: ResourceType,
        /// Resource id.
        resource_id: u64,
    },

    /// A lock was released that the client does not hold.
    #[error("{mode} lock on {resource_type}({resource_id}) is not held")]
    LockNotHeld {
        /// Mode of the release.
        mode: LockMode,
        /// Resource type.
        resource_type: ResourceType,
        /// Resource id.
        resource_id: u64,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an index population error.
    pub fn index_population(index_id: IndexId, message: impl Into<String>) -> Self {
        Self::IndexPopulation {
            index_id,
            message: message.into(),
        }
    }

    /// Creates a scan failure error.
    pub fn scan_failed(message: impl Into<String>) -> Self {
        Self::ScanFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the caller may retry the failed operation.
    ///
    /// Only lock timeouts are retryable; the core never retries on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_is_retryable() {
        let err = CoreError::LockTimeout {
            mode: LockMode::Exclusive,
            resource_type: ResourceType::Schema,
            resource_id: 3,
        };
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "timed out acquiring EXCLUSIVE lock on SCHEMA(3)"
        );
    }

    #[test]
    fn population_error_is_not_retryable() {
        let err = CoreError::index_population(IndexId::new(7), "boom");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "population of index idx:7 failed: boom");
    }
}
