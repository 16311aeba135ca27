//! Task dispatcher — main loop that admits and executes ready tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dataforge_core::config::dispatcher::DispatcherConfig;
use dataforge_core::result::AppResult;
use dataforge_core::types::id::TaskId;
use dataforge_database::TaskStore;
use dataforge_entity::task::Task;

use crate::history::HistoryRecorder;
use crate::processor::{ExecutionContext, Processor, ProcessorError};
use crate::registry::ProcessorRegistry;
use crate::resolver::DependencyResolver;

/// Entry in the dispatcher's running-task table.
#[derive(Debug)]
struct RunningTask {
    /// Cancellation token observed by the processor at checkpoints.
    cancel: CancellationToken,
    /// Join handle of the execution unit. Filled in right after spawning.
    handle: Option<tokio::task::JoinHandle<()>>,
}

/// Periodic loop that admits pending tasks up to a concurrency bound and
/// runs them through their processor.
///
/// The running-task table is private to the dispatcher and is not
/// authoritative: after a process restart, tasks left running in the store
/// must be reconciled externally.
#[derive(Debug)]
pub struct TaskDispatcher {
    store: Arc<dyn TaskStore>,
    registry: Arc<ProcessorRegistry>,
    resolver: Arc<DependencyResolver>,
    history: Arc<HistoryRecorder>,
    config: DispatcherConfig,
    running: Arc<DashMap<TaskId, RunningTask>>,
}

impl TaskDispatcher {
    /// Create a new dispatcher.
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<ProcessorRegistry>,
        resolver: Arc<DependencyResolver>,
        history: Arc<HistoryRecorder>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            registry,
            resolver,
            history,
            config,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Start the dispatch loop — runs until the shutdown signal is received.
    ///
    /// Per-cycle errors (e.g. an unavailable store) are logged and retried
    /// on the next cycle. In-flight execution units are not forcibly killed
    /// on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = self.config.poll_interval_seconds,
            candidate_window = self.config.candidate_window,
            max_concurrent = self.config.max_concurrent,
            "Task dispatcher started"
        );

        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds);

        loop {
            if let Err(e) = self.run_cycle().await {
                error!("Dispatch cycle failed, retrying next cycle: {e}");
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Task dispatcher received shutdown signal");
                        break;
                    }
                }
                _ = time::sleep(poll_interval) => {}
            }
        }

        info!(
            in_flight = self.running.len(),
            "Task dispatcher stopped; in-flight tasks run to completion"
        );
    }

    /// Execute one poll cycle: reap finished execution units, then admit
    /// ready pending tasks until the concurrency bound is reached. Returns
    /// the number of tasks admitted.
    pub async fn run_cycle(&self) -> AppResult<usize> {
        self.reap_finished();

        let candidates = self.store.find_pending(self.config.candidate_window).await?;
        let mut admitted = 0;

        for task in candidates {
            if self.running.len() >= self.config.max_concurrent {
                break;
            }
            if self.running.contains_key(&task.id) {
                continue;
            }

            match self.resolver.satisfied(&task).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(task_id = %task.id, "Dependency check failed: {e}");
                    continue;
                }
            }

            let Some(processor) = self.registry.get(&task.task_type) else {
                let message =
                    format!("No processor registered for task type '{}'", task.task_type);
                error!(task_id = %task.id, "{message}");
                if let Err(e) = self.store.mark_failed(task.id, &message).await {
                    error!(task_id = %task.id, "Failed to mark task failed: {e}");
                }
                continue;
            };

            self.spawn_execution(task, processor);
            admitted += 1;
        }

        Ok(admitted)
    }

    /// Request cancellation of a task.
    ///
    /// A task tracked in the running-task table has its token cancelled and
    /// stops at the processor's next checkpoint. A pending task that was
    /// never admitted is cancelled immediately, without invoking any
    /// processor. Terminal tasks cannot be cancelled.
    pub async fn cancel(&self, id: TaskId) -> AppResult<bool> {
        let Some(task) = self.store.find_task(id).await? else {
            warn!(task_id = %id, "Cancel requested for unknown task");
            return Ok(false);
        };
        if task.is_terminal() {
            warn!(task_id = %id, status = %task.status, "Cancel requested for terminal task");
            return Ok(false);
        }

        if let Some(entry) = self.running.get(&id) {
            entry.cancel.cancel();
            info!(task_id = %id, "Cancellation requested for running task");
            return Ok(true);
        }

        self.store.mark_cancelled(id).await?;
        info!(task_id = %id, "Cancelled pending task");
        Ok(true)
    }

    /// Number of currently tracked execution units.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Whether a task is tracked in the running-task table.
    pub fn is_running(&self, id: TaskId) -> bool {
        self.running.contains_key(&id)
    }

    /// Drop table entries whose execution unit has finished. Entries
    /// normally remove themselves on exit; this also covers units that
    /// aborted without reaching their cleanup.
    fn reap_finished(&self) {
        self.running.retain(|_, entry| match &entry.handle {
            Some(handle) => !handle.is_finished(),
            None => true,
        });
    }

    /// Track the task and spawn its execution unit.
    fn spawn_execution(&self, task: Task, processor: Arc<dyn Processor>) {
        let cancel = CancellationToken::new();
        let task_id = task.id;
        self.running.insert(
            task_id,
            RunningTask {
                cancel: cancel.clone(),
                handle: None,
            },
        );

        let store = Arc::clone(&self.store);
        let history = Arc::clone(&self.history);
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            execute(store, history, processor, task, cancel).await;
            running.remove(&task_id);
        });

        if let Some(mut entry) = self.running.get_mut(&task_id) {
            entry.handle = Some(handle);
        }
    }
}

/// Shared execution wrapper applied uniformly to every processor.
async fn execute(
    store: Arc<dyn TaskStore>,
    history: Arc<HistoryRecorder>,
    processor: Arc<dyn Processor>,
    task: Task,
    cancel: CancellationToken,
) {
    info!(task_id = %task.id, task_type = %task.task_type, "Executing task");

    if !processor.supported_types().contains(&task.task_type.as_str()) {
        let message = format!(
            "Task type '{}' is not supported by its processor",
            task.task_type
        );
        fail(&store, task.id, &message).await;
        return;
    }

    let parameters = task
        .parameters
        .clone()
        .unwrap_or_else(|| serde_json::json!({}));
    if !processor.validate_parameters(&task.task_type, &parameters) {
        let message = format!("Invalid parameters for task type '{}'", task.task_type);
        fail(&store, task.id, &message).await;
        return;
    }

    if let Err(e) = store.mark_running(task.id, Utc::now()).await {
        // Store unavailable: leave the task pending for the next cycle.
        error!(task_id = %task.id, "Failed to mark task running: {e}");
        return;
    }

    let ctx = ExecutionContext::new(task.id, cancel.clone(), Arc::clone(&store));
    let outcome = std::panic::AssertUnwindSafe(processor.run(&task, &ctx))
        .catch_unwind()
        .await;

    let transition = match outcome {
        Ok(Ok(result)) if !cancel.is_cancelled() => {
            info!(task_id = %task.id, "Task completed");
            store.mark_completed(task.id, Some(&result)).await
        }
        Ok(Ok(_)) => {
            // Cancelled between the last checkpoint and returning: the
            // partial result is discarded.
            info!(task_id = %task.id, "Task cancelled at completion boundary");
            store.mark_cancelled(task.id).await
        }
        Ok(Err(ProcessorError::Cancelled)) => {
            info!(task_id = %task.id, "Task cancelled at checkpoint");
            store.mark_cancelled(task.id).await
        }
        Ok(Err(ProcessorError::Failed(message))) => {
            warn!(task_id = %task.id, "Task failed: {message}");
            store.mark_failed(task.id, &message).await
        }
        Err(payload) => {
            let message = format!("Processor panicked: {}", panic_message(payload.as_ref()));
            error!(task_id = %task.id, "{message}");
            store.mark_failed(task.id, &message).await
        }
    };
    if let Err(e) = transition {
        error!(task_id = %task.id, "Failed to persist terminal status: {e}");
    }

    match store.find_task(task.id).await {
        Ok(Some(final_task)) => {
            if let Err(e) = history.record(&final_task).await {
                error!(task_id = %task.id, "Failed to record execution history: {e}");
            }
        }
        Ok(None) => {}
        Err(e) => error!(task_id = %task.id, "Failed to reload task for history: {e}"),
    }
}

/// Mark a task failed before it ever ran, logging store errors.
async fn fail(store: &Arc<dyn TaskStore>, id: TaskId, message: &str) {
    error!(task_id = %id, "{message}");
    if let Err(e) = store.mark_failed(id, message).await {
        error!(task_id = %id, "Failed to mark task failed: {e}");
    }
}

/// Extract a readable message from a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
