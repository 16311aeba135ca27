//! Recurrence scheduler configuration.

use serde::{Deserialize, Serialize};

/// Recurrence scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the scheduler loop is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval in seconds between due-schedule checks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}
