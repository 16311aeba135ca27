//! Task entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use dataforge_core::types::id::{SourceId, TaskId, UserId};

use super::status::TaskStatus;

/// A background processing task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// Human-readable task name.
    pub name: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Task type tag (e.g., `"csv_process"`, `"url_crawl"`). Selects the
    /// processor and the parameter schema.
    pub task_type: String,
    /// Current task status.
    pub status: TaskStatus,
    /// Dispatch priority; higher values are dispatched first.
    pub priority: i32,
    /// Processor-specific parameters (JSON). Schema owned by the processor.
    pub parameters: Option<serde_json::Value>,
    /// Result data on completion (JSON). Schema owned by the processor.
    pub result: Option<serde_json::Value>,
    /// Error message on failure.
    pub error_message: Option<String>,
    /// Execution progress, 0–100. Monotonic while running.
    pub progress: i32,
    /// Whether this task is a recurrence origin.
    pub is_recurring: bool,
    /// Raw schedule type string (`"once"`, `"daily"`, `"weekly"`,
    /// `"monthly"`, `"cron"`, or anything else — unrecognized values fall
    /// back to daily at firing time).
    pub schedule_type: Option<String>,
    /// Schedule argument: interval multiplier or cron expression.
    pub schedule_value: Option<String>,
    /// Next scheduled firing time.
    pub next_run_time: Option<DateTime<Utc>>,
    /// When the schedule last fired.
    pub last_run_time: Option<DateTime<Utc>>,
    /// Number of times the schedule has fired.
    pub run_count: i32,
    /// Maximum number of firings; `None` means unlimited.
    pub max_runs: Option<i32>,
    /// Whether admission waits for dependency edges to be satisfied.
    pub wait_for_dependencies: bool,
    /// Opaque handle to the owning user.
    pub owner_id: Option<UserId>,
    /// Opaque handle to the data source this task operates on.
    pub source_id: Option<SourceId>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Build the creation payload for a fresh instance spawned from this
    /// recurrence origin. Static fields are cloned; recurrence bookkeeping
    /// stays on the origin row.
    pub fn spawn_instance(&self) -> CreateTask {
        CreateTask {
            name: self.name.clone(),
            description: self.description.clone(),
            task_type: self.task_type.clone(),
            priority: self.priority,
            parameters: self.parameters.clone(),
            wait_for_dependencies: self.wait_for_dependencies,
            owner_id: self.owner_id,
            source_id: self.source_id,
        }
    }
}

/// Data required to create a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    /// Human-readable task name.
    pub name: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Task type tag.
    pub task_type: String,
    /// Dispatch priority.
    pub priority: i32,
    /// Processor-specific parameters.
    pub parameters: Option<serde_json::Value>,
    /// Whether admission waits for dependency edges.
    pub wait_for_dependencies: bool,
    /// Opaque handle to the owning user.
    pub owner_id: Option<UserId>,
    /// Opaque handle to the data source.
    pub source_id: Option<SourceId>,
}

impl CreateTask {
    /// Create a task payload with default priority and dependency gating.
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            task_type: task_type.into(),
            priority: 0,
            parameters: None,
            wait_for_dependencies: true,
            owner_id: None,
            source_id: None,
        }
    }
}
