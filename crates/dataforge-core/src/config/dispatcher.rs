//! Task dispatcher configuration.

use serde::{Deserialize, Serialize};

/// Task dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Whether the dispatcher loop is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval in seconds between pending-task polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Number of pending tasks examined per poll cycle.
    #[serde(default = "default_candidate_window")]
    pub candidate_window: u32,
    /// Maximum number of tasks executing concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: default_poll_interval(),
            candidate_window: default_candidate_window(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

fn default_candidate_window() -> u32 {
    20
}

fn default_max_concurrent() -> usize {
    10
}
