// SPDX-License-Identifier: Apache-2.0

//! Timing and retry settings for the pump.

use std::time::Duration;

/// Configuration for the pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpConfig {
    /// Sleep after an end-of-file that did not lead to a file switch
    pub poll_interval: Duration,
    /// Minimum time since the last record before probing for a newer file
    pub switch_file_interval: Duration,
    /// Sleep between re-reads after a read error or malformed record
    pub error_reread_interval: Duration,
    /// Consecutive failed reads tolerated before skipping to the next file
    pub error_retry_count: u32,
    /// How often rolling averages are published
    pub stats_interval: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            switch_file_interval: Duration::from_secs(5),
            error_reread_interval: Duration::from_secs(1),
            error_retry_count: 5,
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl PumpConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.error_retry_count == 0 {
            return Err("Error retry count must be at least 1".to_string());
        }

        if self.stats_interval.is_zero() {
            return Err("Statistics interval must be greater than zero".to_string());
        }

        Ok(())
    }
}
