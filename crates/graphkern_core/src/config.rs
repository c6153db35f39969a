//! Population and locking configuration.

use std::time::Duration;

/// Configuration for a multi-index population pass.
#[derive(Debug, Clone)]
pub struct PopulationConfig {
    /// Scanned entries buffered per population before one `add` call.
    pub batch_size: usize,

    /// Queue length at which the scan thread drains already-covered updates.
    pub queue_threshold: usize,

    /// Log progress every N scanned entities (0 = never).
    pub print_progress_every: u64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            queue_threshold: 1_000,
            print_progress_every: 0,
        }
    }
}

impl PopulationConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scan batch size. Zero is treated as one.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets the opportunistic drain threshold.
    #[must_use]
    pub const fn queue_threshold(mut self, threshold: usize) -> Self {
        self.queue_threshold = threshold;
        self
    }

    /// Sets how often progress is logged.
    #[must_use]
    pub const fn print_progress_every(mut self, every: u64) -> Self {
        self.print_progress_every = every;
        self
    }
}

/// Configuration for a [`crate::lock::LockManager`].
#[derive(Debug, Clone, Default)]
pub struct LockConfig {
    /// How long an acquisition may block before failing (`None` = forever).
    pub acquisition_timeout: Option<Duration>,
}

impl LockConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the acquisition timeout.
    #[must_use]
    pub const fn acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.acquisition_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = PopulationConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.queue_threshold, 1_000);
        assert_eq!(config.print_progress_every, 0);
        assert!(LockConfig::default().acquisition_timeout.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = PopulationConfig::new().batch_size(0).queue_threshold(8);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.queue_threshold, 8);

        let locks = LockConfig::new().acquisition_timeout(Duration::from_millis(5));
        assert_eq!(locks.acquisition_timeout, Some(Duration::from_millis(5)));
    }
}
