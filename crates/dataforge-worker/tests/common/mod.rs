//! Shared fixtures for worker integration tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use dataforge_core::config::dispatcher::DispatcherConfig;
use dataforge_core::types::id::TaskId;
use dataforge_database::{MemoryTaskStore, TaskStore};
use dataforge_entity::task::{CreateTask, Task, TaskStatus};
use dataforge_worker::processors::NoopProcessor;
use dataforge_worker::{
    DependencyResolver, ExecutionContext, HistoryRecorder, Processor, ProcessorError,
    ProcessorRegistry, TaskDispatcher,
};

/// Processor that loops at checkpoints until cancelled (or a generous
/// iteration cap, so un-cancelled tests still terminate).
#[derive(Debug)]
pub struct StallingProcessor;

#[async_trait]
impl Processor for StallingProcessor {
    fn supported_types(&self) -> &[&'static str] {
        &["stall"]
    }

    fn validate_parameters(&self, _task_type: &str, _parameters: &Value) -> bool {
        true
    }

    async fn run(&self, _task: &Task, ctx: &ExecutionContext) -> Result<Value, ProcessorError> {
        for _ in 0..1_000 {
            ctx.checkpoint()?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(serde_json::json!({ "success": true }))
    }
}

/// Processor that reports progress 40 and then fails.
#[derive(Debug)]
pub struct FlakyProcessor;

#[async_trait]
impl Processor for FlakyProcessor {
    fn supported_types(&self) -> &[&'static str] {
        &["flaky"]
    }

    fn validate_parameters(&self, _task_type: &str, _parameters: &Value) -> bool {
        true
    }

    async fn run(&self, _task: &Task, ctx: &ExecutionContext) -> Result<Value, ProcessorError> {
        ctx.report_progress(40).await;
        Err(ProcessorError::failed("flaky processor exploded"))
    }
}

/// Registry with the noop processor plus the test processors above.
pub fn test_registry() -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(NoopProcessor));
    registry.register(Arc::new(StallingProcessor));
    registry.register(Arc::new(FlakyProcessor));
    registry
}

/// Build a dispatcher over the given store with the given concurrency bound.
pub fn dispatcher_with(
    store: &Arc<MemoryTaskStore>,
    registry: ProcessorRegistry,
    max_concurrent: usize,
) -> TaskDispatcher {
    let store: Arc<dyn TaskStore> = Arc::clone(store) as Arc<dyn TaskStore>;
    let resolver = Arc::new(DependencyResolver::new(Arc::clone(&store)));
    let history = Arc::new(HistoryRecorder::new(Arc::clone(&store)));
    let config = DispatcherConfig {
        max_concurrent,
        ..DispatcherConfig::default()
    };
    TaskDispatcher::new(store, Arc::new(registry), resolver, history, config)
}

/// Build a resolver over the given store.
pub fn resolver_with(store: &Arc<MemoryTaskStore>) -> DependencyResolver {
    DependencyResolver::new(Arc::clone(store) as Arc<dyn TaskStore>)
}

/// Create a pending task of the given type.
pub async fn create_task(store: &Arc<MemoryTaskStore>, name: &str, task_type: &str) -> Task {
    store
        .create_task(&CreateTask::new(name, task_type))
        .await
        .unwrap()
}

/// Poll the store until the task reaches the expected status.
pub async fn wait_for_status(
    store: &Arc<MemoryTaskStore>,
    id: TaskId,
    status: TaskStatus,
) -> Task {
    for _ in 0..400 {
        let task = store.find_task(id).await.unwrap().unwrap();
        if task.status == status {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} never reached status '{status}'");
}

/// Poll until the dispatcher's running-task table is empty.
pub async fn wait_until_idle(dispatcher: &TaskDispatcher) {
    for _ in 0..400 {
        if dispatcher.running_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("dispatcher running-task table never drained");
}
