//! Query status snapshots.

use crate::lock::{LockMode, ResourceType};
use serde::Serialize;
use std::collections::BTreeMap;

/// A value in a rendered status map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusValue {
    /// Text field.
    Text(String),
    /// Numeric field.
    Integer(u64),
    /// List of resource ids.
    Ids(Vec<u64>),
}

impl From<&str> for StatusValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

/// Lock wait details carried by [`QueryStatus::Waiting`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingOnLock {
    mode: LockMode,
    resource_type: ResourceType,
    resource_ids: Vec<u64>,
    start_nanos: u64,
}

impl WaitingOnLock {
    /// Creates a wait record started at `start_nanos`.
    #[must_use]
    pub fn new(
        mode: LockMode,
        resource_type: ResourceType,
        resource_ids: Vec<u64>,
        start_nanos: u64,
    ) -> Self {
        Self {
            mode,
            resource_type,
            resource_ids,
            start_nanos,
        }
    }

    /// Requested lock mode.
    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    /// Resource type waited on.
    #[must_use]
    pub const fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Resource ids waited on.
    #[must_use]
    pub fn resource_ids(&self) -> &[u64] {
        &self.resource_ids
    }

    /// Clock reading when the wait began.
    #[must_use]
    pub const fn start_nanos(&self) -> u64 {
        self.start_nanos
    }

    /// Nanoseconds spent waiting as of `now_nanos`.
    #[must_use]
    pub const fn wait_nanos(&self, now_nanos: u64) -> u64 {
        now_nanos.saturating_sub(self.start_nanos)
    }
}

/// What an execution context is doing right now.
///
/// Snapshots are immutable; a transition builds a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    /// Executing.
    Running,
    /// Being planned.
    Planning,
    /// Blocked on a lock.
    Waiting(WaitingOnLock),
}

impl QueryStatus {
    /// The running state.
    #[must_use]
    pub const fn running() -> Self {
        Self::Running
    }

    /// The planning state.
    #[must_use]
    pub const fn planning() -> Self {
        Self::Planning
    }

    /// A waiting state.
    #[must_use]
    pub fn waiting(
        mode: LockMode,
        resource_type: ResourceType,
        resource_ids: Vec<u64>,
        start_nanos: u64,
    ) -> Self {
        Self::Waiting(WaitingOnLock::new(
            mode,
            resource_type,
            resource_ids,
            start_nanos,
        ))
    }

    /// State name as rendered under `state`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Planning => "PLANNING",
            Self::Waiting(_) => "WAITING",
        }
    }

    /// Returns true while blocked on a lock.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting(_))
    }

    /// Renders a flat snapshot for inspection endpoints.
    #[must_use]
    pub fn to_map(&self, now_nanos: u64) -> BTreeMap<&'static str, StatusValue> {
        let mut map = BTreeMap::new();
        map.insert("state", StatusValue::from(self.name()));
        if let Self::Waiting(wait) = self {
            map.insert(
                "waitTimeMillis",
                StatusValue::Integer(wait.wait_nanos(now_nanos) / 1_000_000),
            );
            map.insert("lockMode", StatusValue::from(wait.mode.name()));
            map.insert("resourceType", StatusValue::from(wait.resource_type.name()));
            map.insert("resourceIds", StatusValue::Ids(wait.resource_ids.clone()));
        }
        map
    }
}
