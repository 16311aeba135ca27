//! The processor contract.
//!
//! A processor implements one or more task types. It never touches the
//! dispatcher's running-task table directly: cancellation and progress flow
//! through the opaque [`ExecutionContext`] handed to [`Processor::run`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use dataforge_core::error::AppError;
use dataforge_core::types::id::TaskId;
use dataforge_database::TaskStore;
use dataforge_entity::task::Task;

/// Error from a processor execution.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The cancellation token was observed at a checkpoint. Partial results
    /// are discarded.
    #[error("task was cancelled")]
    Cancelled,

    /// The execution failed; the message becomes the task's error text.
    #[error("{0}")]
    Failed(String),
}

impl ProcessorError {
    /// Create a failure with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<AppError> for ProcessorError {
    fn from(err: AppError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Trait for task processor implementations.
///
/// One processor instance serves a family of task types; the dispatcher
/// selects it by looking the task's type tag up in the registry.
#[async_trait]
pub trait Processor: Send + Sync + std::fmt::Debug {
    /// The task type tags this processor handles.
    fn supported_types(&self) -> &[&'static str];

    /// Validate the parameters of a task before execution. The type tag is
    /// passed alongside the payload because validation rules are keyed by
    /// type.
    fn validate_parameters(&self, task_type: &str, parameters: &Value) -> bool;

    /// Execute the task. Long-running implementations must call
    /// [`ExecutionContext::checkpoint`] at every natural unit of work (per
    /// row, per page, per batch) so that cancellation is observed promptly;
    /// the worst-case cancellation latency is one such unit.
    async fn run(&self, task: &Task, ctx: &ExecutionContext) -> Result<Value, ProcessorError>;
}

/// Per-execution handle passed into [`Processor::run`].
///
/// Wraps the task's cancellation token from the dispatcher's running-task
/// table and a progress channel into the store.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    task_id: TaskId,
    cancel: CancellationToken,
    store: Arc<dyn TaskStore>,
}

impl ExecutionContext {
    pub(crate) fn new(task_id: TaskId, cancel: CancellationToken, store: Arc<dyn TaskStore>) -> Self {
        Self {
            task_id,
            cancel,
            store,
        }
    }

    /// The id of the executing task.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation checkpoint: returns
    /// [`ProcessorError::Cancelled`] once cancellation has been requested,
    /// so processors can bail out with `?`.
    pub fn checkpoint(&self) -> Result<(), ProcessorError> {
        if self.cancel.is_cancelled() {
            Err(ProcessorError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Report execution progress (0–100). Progress is monotonic; a value
    /// below the current one is ignored. Persistence is best-effort: a
    /// store error is logged, never propagated into the execution.
    pub async fn report_progress(&self, progress: i32) {
        if let Err(e) = self.store.update_progress(self.task_id, progress).await {
            warn!(task_id = %self.task_id, "Failed to persist progress: {e}");
        }
    }
}
