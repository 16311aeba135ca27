//! Execution history record entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

use dataforge_core::types::id::{ExecutionId, TaskId, UserId};

use crate::task::status::TaskStatus;

/// An immutable record of one terminal task execution.
///
/// Records are appended after every terminal transition of a task that
/// actually started, and are never updated or deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
    /// Unique record identifier.
    pub id: ExecutionId,
    /// The executed task.
    pub task_id: TaskId,
    /// Task name at execution time.
    pub task_name: String,
    /// Task type tag.
    pub task_type: String,
    /// Final status (always terminal).
    pub status: TaskStatus,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution reached the terminal state.
    pub completed_at: DateTime<Utc>,
    /// Execution duration in seconds.
    pub duration_seconds: i64,
    /// Size-bounded summary of the result payload.
    pub result_summary: Option<serde_json::Value>,
    /// Error message, if the execution failed.
    pub error_message: Option<String>,
    /// Opaque handle to the owning user.
    pub owner_id: Option<UserId>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

/// Data required to append a new execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExecutionRecord {
    /// The executed task.
    pub task_id: TaskId,
    /// Task name at execution time.
    pub task_name: String,
    /// Task type tag.
    pub task_type: String,
    /// Final status.
    pub status: TaskStatus,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution reached the terminal state.
    pub completed_at: DateTime<Utc>,
    /// Execution duration in seconds.
    pub duration_seconds: i64,
    /// Size-bounded summary of the result payload.
    pub result_summary: Option<serde_json::Value>,
    /// Error message, if any.
    pub error_message: Option<String>,
    /// Opaque handle to the owning user.
    pub owner_id: Option<UserId>,
}

/// Aggregate statistics over execution history records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Total number of recorded executions.
    pub total_count: i64,
    /// Number of completed executions.
    pub success_count: i64,
    /// Number of failed executions.
    pub failure_count: i64,
    /// Number of cancelled executions.
    pub cancelled_count: i64,
    /// Average execution duration in seconds.
    pub avg_duration_seconds: f64,
    /// Execution counts per task type.
    pub per_type: HashMap<String, i64>,
}
