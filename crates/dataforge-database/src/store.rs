//! The task store trait.
//!
//! The orchestration core treats persistence as a collaborator behind this
//! trait: task rows, dependency edges, and execution history, with
//! read-your-writes consistency assumed for a single caller. The in-process
//! running-task table is *not* part of the store and is never authoritative.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dataforge_core::result::AppResult;
use dataforge_core::types::id::{DependencyId, SourceId, TaskId, UserId};
use dataforge_core::types::pagination::{PageRequest, PageResponse};
use dataforge_entity::dependency::{CreateDependency, TaskDependency};
use dataforge_entity::history::{CreateExecutionRecord, ExecutionRecord, ExecutionStats};
use dataforge_entity::task::{CreateTask, ScheduleSpec, Task, TaskStatus};

/// Filter for task list queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Only tasks with this status.
    pub status: Option<TaskStatus>,
    /// Only tasks with this type tag.
    pub task_type: Option<String>,
    /// Only tasks attached to this data source.
    pub source_id: Option<SourceId>,
    /// Only tasks owned by this user.
    pub owner_id: Option<UserId>,
    /// Case-insensitive substring match on name or description.
    pub search: Option<String>,
}

/// Persistent store for tasks, dependency edges, and execution history.
///
/// Status-transition operations enforce the task state machine: a transition
/// whose precondition no longer holds (e.g. completing a task that was
/// cancelled meanwhile) is a silent no-op rather than an error, so that the
/// dispatcher and external cancellation can race safely.
#[async_trait]
pub trait TaskStore: Send + Sync + std::fmt::Debug + 'static {
    // ── Tasks ────────────────────────────────────────────────────

    /// Create a new pending task.
    async fn create_task(&self, data: &CreateTask) -> AppResult<Task>;

    /// Find a task by ID.
    async fn find_task(&self, id: TaskId) -> AppResult<Option<Task>>;

    /// List tasks matching a filter, newest first.
    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Task>>;

    /// Fetch pending tasks ordered by (priority desc, created_at asc),
    /// limited to `limit` rows.
    async fn find_pending(&self, limit: u32) -> AppResult<Vec<Task>>;

    /// Fetch recurrence origins that are due: `is_recurring`,
    /// `next_run_time <= now`, and status terminal.
    async fn find_due_recurring(&self, now: DateTime<Utc>) -> AppResult<Vec<Task>>;

    /// Transition a pending task to running with progress 0.
    async fn mark_running(&self, id: TaskId, started_at: DateTime<Utc>) -> AppResult<()>;

    /// Update the progress of a running task. Progress is monotonic: a value
    /// below the current one is ignored.
    async fn update_progress(&self, id: TaskId, progress: i32) -> AppResult<()>;

    /// Transition a running task to completed with progress 100 and a result.
    async fn mark_completed(
        &self,
        id: TaskId,
        result: Option<&serde_json::Value>,
    ) -> AppResult<()>;

    /// Transition a pending or running task to failed with an error message.
    async fn mark_failed(&self, id: TaskId, error: &str) -> AppResult<()>;

    /// Transition a pending or running task to cancelled.
    async fn mark_cancelled(&self, id: TaskId) -> AppResult<()>;

    /// Attach a recurrence policy to a task.
    async fn set_schedule(
        &self,
        id: TaskId,
        spec: &ScheduleSpec,
        next_run_time: Option<DateTime<Utc>>,
    ) -> AppResult<()>;

    /// Detach a task's recurrence policy.
    async fn clear_schedule(&self, id: TaskId) -> AppResult<()>;

    /// Stop a recurrence origin from firing again.
    async fn disable_recurrence(&self, id: TaskId) -> AppResult<()>;

    /// Atomically fire a recurrence origin: insert `instance` as a fresh
    /// pending task, increment the origin's run_count, set its
    /// last_run_time to `fired_at`, store `next_run_time`, and clear
    /// `is_recurring` when `keep_recurring` is false. Either all effects
    /// are applied or none are.
    async fn spawn_recurring_instance(
        &self,
        origin_id: TaskId,
        fired_at: DateTime<Utc>,
        next_run_time: Option<DateTime<Utc>>,
        keep_recurring: bool,
        instance: &CreateTask,
    ) -> AppResult<Task>;

    /// Delete a task. Only terminal tasks may be deleted; a non-terminal
    /// task yields a validation error. Returns `false` if the task does
    /// not exist.
    async fn delete_task(&self, id: TaskId) -> AppResult<bool>;

    // ── Dependency edges ─────────────────────────────────────────

    /// Insert a dependency edge. Duplicate (parent, child) pairs yield a
    /// conflict error. Graph-level validation (existence, acyclicity) is
    /// the dependency resolver's responsibility.
    async fn create_edge(&self, data: &CreateDependency) -> AppResult<TaskDependency>;

    /// Delete a dependency edge. Returns `false` if it does not exist.
    async fn delete_edge(&self, id: DependencyId) -> AppResult<bool>;

    /// List the edges pointing at a child task (its prerequisites).
    async fn edges_for_child(&self, child: TaskId) -> AppResult<Vec<TaskDependency>>;

    /// List the edges originating from a parent task (its dependents).
    async fn edges_for_parent(&self, parent: TaskId) -> AppResult<Vec<TaskDependency>>;

    // ── Execution history ────────────────────────────────────────

    /// Append an execution history record.
    async fn record_execution(
        &self,
        data: &CreateExecutionRecord,
    ) -> AppResult<ExecutionRecord>;

    /// List a task's execution records, newest first.
    async fn history_for_task(
        &self,
        task_id: TaskId,
        page: &PageRequest,
    ) -> AppResult<Vec<ExecutionRecord>>;

    /// Aggregate statistics over all execution records.
    async fn execution_stats(&self) -> AppResult<ExecutionStats>;
}
