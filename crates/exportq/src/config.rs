//! Queue configuration.

use crate::error::ConfigError;
use exportq_storage::ComponentId;
use serde::{Deserialize, Serialize};

/// Configuration for the exporter sending queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Whether the queue is enabled. When disabled, every offer fails and
    /// is logged; nothing is buffered.
    pub enabled: bool,

    /// Number of consumer workers draining the queue.
    pub num_consumers: usize,

    /// Maximum occupancy, in the unit chosen by the sizer (requests or
    /// bytes).
    pub queue_size: i64,

    /// Id of the storage extension backing the queue. Absent means the
    /// queue holds items in memory only.
    pub storage_id: Option<ComponentId>,

    /// Reserved for variants that block producers instead of dropping.
    pub blocking: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            num_consumers: 10,
            queue_size: 1000,
            storage_id: None,
            blocking: false,
        }
    }
}

impl QueueConfig {
    /// Checks the configuration for consistency. Validation is skipped for
    /// a disabled queue.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.queue_size <= 0 {
            return Err(ConfigError::NonPositiveQueueSize);
        }
        if self.num_consumers == 0 {
            return Err(ConfigError::NonPositiveConsumers);
        }
        Ok(())
    }

    /// Sets the queue capacity.
    pub fn with_queue_size(mut self, queue_size: i64) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Sets the number of consumer workers.
    pub fn with_num_consumers(mut self, num_consumers: usize) -> Self {
        self.num_consumers = num_consumers;
        self
    }

    /// Backs the queue with the given storage extension.
    pub fn with_storage(mut self, storage_id: ComponentId) -> Self {
        self.storage_id = Some(storage_id);
        self
    }

    /// Disables the queue.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
