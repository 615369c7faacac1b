//! Combiner configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::CombinerError;

/// Combiner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinerConfig {
    /// Handles selected per accounting cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Accounting loop cadence in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Dispatch channel capacity (0 derives it from batch_size)
    #[serde(default)]
    pub dispatch_capacity: usize,

    /// Seed for the selection RNG; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_batch_size() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    5
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval_ms: 5,
            dispatch_capacity: 0,
            seed: None,
        }
    }
}

impl CombinerConfig {
    /// Get the accounting cadence as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Dispatch queue depth below which a new batch is selected
    pub fn refill_threshold(&self) -> usize {
        (self.batch_size / 2).max(1)
    }

    /// Capacity of the dispatch channel between the two loops
    ///
    /// Must hold a full batch on top of a queue sitting just under the refill threshold.
    pub fn effective_dispatch_capacity(&self) -> usize {
        if self.dispatch_capacity == 0 {
            self.batch_size * 2
        } else {
            self.dispatch_capacity
        }
    }

    /// Reject settings the accounting loop cannot run with
    pub fn validate(&self) -> Result<(), CombinerError> {
        debug!(?self, "CombinerConfig::validate: called");
        if self.batch_size == 0 {
            return Err(CombinerError::InvalidConfig("batch_size must be at least 1".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(CombinerError::InvalidConfig(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.dispatch_capacity != 0 && self.dispatch_capacity < self.batch_size {
            return Err(CombinerError::InvalidConfig(format!(
                "dispatch_capacity {} is smaller than batch_size {}",
                self.dispatch_capacity, self.batch_size
            )));
        }
        Ok(())
    }
}
