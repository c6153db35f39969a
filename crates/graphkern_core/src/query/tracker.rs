//! Current-status holder for one execution context.

use crate::query::QueryStatus;
use parking_lot::RwLock;
use std::sync::Arc;

/// Publishes the [`QueryStatus`] of one execution context.
///
/// Writers swap in a whole new snapshot; readers clone the `Arc` and never
/// see a half-built status.
#[derive(Debug)]
pub struct ExecutionStatus {
    current: RwLock<Arc<QueryStatus>>,
}

impl ExecutionStatus {
    /// Creates a tracker in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_status(QueryStatus::Running)
    }

    /// Creates a tracker in the given state.
    #[must_use]
    pub fn with_status(status: QueryStatus) -> Self {
        Self {
            current: RwLock::new(Arc::new(status)),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<QueryStatus> {
        Arc::clone(&self.current.read())
    }

    /// Installs `status` and returns the snapshot it replaced.
    pub fn replace(&self, status: QueryStatus) -> Arc<QueryStatus> {
        std::mem::replace(&mut *self.current.write(), Arc::new(status))
    }

    /// Reinstalls a previously taken snapshot.
    pub fn restore(&self, previous: Arc<QueryStatus>) {
        *self.current.write() = previous;
    }

    /// Transitions to planning.
    pub fn start_planning(&self) {
        self.replace(QueryStatus::Planning);
    }

    /// Transitions to running.
    pub fn start_running(&self) {
        self.replace(QueryStatus::Running);
    }
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        Self::new()
    }
}
