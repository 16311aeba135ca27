//! In-memory implementation of the task store.
//!
//! Used by tests and by single-process development mode. Backed by DashMap;
//! not durable, and only suitable for a single process.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use dataforge_core::error::AppError;
use dataforge_core::result::AppResult;
use dataforge_core::types::id::{DependencyId, ExecutionId, TaskId};
use dataforge_core::types::pagination::{PageRequest, PageResponse};
use dataforge_entity::dependency::{CreateDependency, TaskDependency};
use dataforge_entity::history::{CreateExecutionRecord, ExecutionRecord, ExecutionStats};
use dataforge_entity::task::{CreateTask, ScheduleSpec, Task, TaskStatus};

use crate::store::{TaskFilter, TaskStore};

/// Task store held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
    edges: DashMap<DependencyId, TaskDependency>,
    history: RwLock<Vec<ExecutionRecord>>,
}

impl MemoryTaskStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn build_task(data: &CreateTask) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new(),
            name: data.name.clone(),
            description: data.description.clone(),
            task_type: data.task_type.clone(),
            status: TaskStatus::Pending,
            priority: data.priority,
            parameters: data.parameters.clone(),
            result: None,
            error_message: None,
            progress: 0,
            is_recurring: false,
            schedule_type: None,
            schedule_value: None,
            next_run_time: None,
            last_run_time: None,
            run_count: 0,
            max_runs: None,
            wait_for_dependencies: data.wait_for_dependencies,
            owner_id: data.owner_id,
            source_id: data.source_id,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn matches(task: &Task, filter: &TaskFilter) -> bool {
        if filter.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if filter
            .task_type
            .as_ref()
            .is_some_and(|t| *t != task.task_type)
        {
            return false;
        }
        if filter.source_id.is_some_and(|s| Some(s) != task.source_id) {
            return false;
        }
        if filter.owner_id.is_some_and(|o| Some(o) != task.owner_id) {
            return false;
        }
        if let Some(search) = &filter.search {
            let needle = search.to_lowercase();
            let in_name = task.name.to_lowercase().contains(&needle);
            let in_description = task
                .description
                .as_ref()
                .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !in_name && !in_description {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, data: &CreateTask) -> AppResult<Task> {
        let task = Self::build_task(data);
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn find_task(&self, id: TaskId) -> AppResult<Option<Task>> {
        Ok(self.tasks.get(&id).map(|t| t.clone()))
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Task>> {
        let mut matching: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| Self::matches(entry.value(), filter))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok(PageResponse::new(items, page.page, page.page_size, total))
    }

    async fn find_pending(&self, limit: u32) -> AppResult<Vec<Task>> {
        let mut pending: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().status == TaskStatus::Pending)
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn find_due_recurring(&self, now: DateTime<Utc>) -> AppResult<Vec<Task>> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| {
                let t = entry.value();
                t.is_recurring
                    && t.status.is_terminal()
                    && t.next_run_time.is_some_and(|next| next <= now)
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn mark_running(&self, id: TaskId, started_at: DateTime<Utc>) -> AppResult<()> {
        if let Some(mut task) = self.tasks.get_mut(&id)
            && task.status == TaskStatus::Pending
        {
            task.status = TaskStatus::Running;
            task.progress = 0;
            task.started_at = Some(started_at);
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_progress(&self, id: TaskId, progress: i32) -> AppResult<()> {
        if let Some(mut task) = self.tasks.get_mut(&id)
            && task.status == TaskStatus::Running
        {
            task.progress = task.progress.max(progress.clamp(0, 100));
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: TaskId,
        result: Option<&serde_json::Value>,
    ) -> AppResult<()> {
        if let Some(mut task) = self.tasks.get_mut(&id)
            && task.status == TaskStatus::Running
        {
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.result = result.cloned();
            task.completed_at = Some(Utc::now());
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, id: TaskId, error: &str) -> AppResult<()> {
        if let Some(mut task) = self.tasks.get_mut(&id)
            && !task.status.is_terminal()
        {
            task.status = TaskStatus::Failed;
            task.error_message = Some(error.to_string());
            task.completed_at = Some(Utc::now());
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_cancelled(&self, id: TaskId) -> AppResult<()> {
        if let Some(mut task) = self.tasks.get_mut(&id)
            && !task.status.is_terminal()
        {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_schedule(
        &self,
        id: TaskId,
        spec: &ScheduleSpec,
        next_run_time: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let mut task = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Task {id} not found")))?;
        task.is_recurring = true;
        task.schedule_type = Some(spec.schedule_type.clone());
        task.schedule_value = spec.schedule_value.clone();
        task.max_runs = spec.max_runs;
        task.next_run_time = next_run_time;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_schedule(&self, id: TaskId) -> AppResult<()> {
        let mut task = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Task {id} not found")))?;
        task.is_recurring = false;
        task.next_run_time = None;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn disable_recurrence(&self, id: TaskId) -> AppResult<()> {
        if let Some(mut task) = self.tasks.get_mut(&id) {
            task.is_recurring = false;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn spawn_recurring_instance(
        &self,
        origin_id: TaskId,
        fired_at: DateTime<Utc>,
        next_run_time: Option<DateTime<Utc>>,
        keep_recurring: bool,
        instance: &CreateTask,
    ) -> AppResult<Task> {
        {
            let mut origin = self.tasks.get_mut(&origin_id).ok_or_else(|| {
                AppError::not_found(format!("Recurrence origin {origin_id} not found"))
            })?;
            origin.run_count += 1;
            origin.last_run_time = Some(fired_at);
            origin.next_run_time = next_run_time;
            origin.is_recurring = keep_recurring;
            origin.updated_at = Utc::now();
        }

        let task = Self::build_task(instance);
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn delete_task(&self, id: TaskId) -> AppResult<bool> {
        let Some(task) = self.tasks.get(&id).map(|t| t.clone()) else {
            return Ok(false);
        };
        if !task.is_terminal() {
            return Err(AppError::validation(format!(
                "Task {id} is {} and cannot be deleted; only terminal tasks may be deleted",
                task.status
            )));
        }

        self.tasks.remove(&id);
        self.edges
            .retain(|_, edge| edge.parent_task_id != id && edge.child_task_id != id);
        Ok(true)
    }

    async fn create_edge(&self, data: &CreateDependency) -> AppResult<TaskDependency> {
        let duplicate = self.edges.iter().any(|entry| {
            entry.parent_task_id == data.parent_task_id
                && entry.child_task_id == data.child_task_id
        });
        if duplicate {
            return Err(AppError::conflict(format!(
                "Dependency from {} to {} already exists",
                data.parent_task_id, data.child_task_id
            )));
        }

        let edge = TaskDependency {
            id: DependencyId::new(),
            parent_task_id: data.parent_task_id,
            child_task_id: data.child_task_id,
            dependency_type: data.dependency_type,
            created_at: Utc::now(),
        };
        self.edges.insert(edge.id, edge.clone());
        Ok(edge)
    }

    async fn delete_edge(&self, id: DependencyId) -> AppResult<bool> {
        Ok(self.edges.remove(&id).is_some())
    }

    async fn edges_for_child(&self, child: TaskId) -> AppResult<Vec<TaskDependency>> {
        Ok(self
            .edges
            .iter()
            .filter(|entry| entry.child_task_id == child)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn edges_for_parent(&self, parent: TaskId) -> AppResult<Vec<TaskDependency>> {
        Ok(self
            .edges
            .iter()
            .filter(|entry| entry.parent_task_id == parent)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn record_execution(
        &self,
        data: &CreateExecutionRecord,
    ) -> AppResult<ExecutionRecord> {
        let record = ExecutionRecord {
            id: ExecutionId::new(),
            task_id: data.task_id,
            task_name: data.task_name.clone(),
            task_type: data.task_type.clone(),
            status: data.status,
            started_at: data.started_at,
            completed_at: data.completed_at,
            duration_seconds: data.duration_seconds,
            result_summary: data.result_summary.clone(),
            error_message: data.error_message.clone(),
            owner_id: data.owner_id,
            created_at: Utc::now(),
        };

        let mut history = self
            .history
            .write()
            .map_err(|_| AppError::internal("History lock poisoned"))?;
        history.push(record.clone());
        Ok(record)
    }

    async fn history_for_task(
        &self,
        task_id: TaskId,
        page: &PageRequest,
    ) -> AppResult<Vec<ExecutionRecord>> {
        let history = self
            .history
            .read()
            .map_err(|_| AppError::internal("History lock poisoned"))?;
        let mut records: Vec<ExecutionRecord> = history
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }

    async fn execution_stats(&self) -> AppResult<ExecutionStats> {
        let history = self
            .history
            .read()
            .map_err(|_| AppError::internal("History lock poisoned"))?;

        let mut stats = ExecutionStats::default();
        let mut total_duration: i64 = 0;
        for record in history.iter() {
            stats.total_count += 1;
            total_duration += record.duration_seconds;
            match record.status {
                TaskStatus::Completed => stats.success_count += 1,
                TaskStatus::Failed => stats.failure_count += 1,
                TaskStatus::Cancelled => stats.cancelled_count += 1,
                _ => {}
            }
            *stats.per_type.entry(record.task_type.clone()).or_insert(0) += 1;
        }
        if stats.total_count > 0 {
            stats.avg_duration_seconds = total_duration as f64 / stats.total_count as f64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataforge_entity::dependency::DependencyType;

    fn create(name: &str, priority: i32) -> CreateTask {
        CreateTask {
            priority,
            ..CreateTask::new(name, "noop")
        }
    }

    #[tokio::test]
    async fn test_find_pending_orders_by_priority_then_age() {
        let store = MemoryTaskStore::new();
        let low = store.create_task(&create("low", 0)).await.unwrap();
        let high = store.create_task(&create("high", 5)).await.unwrap();
        let low_later = store.create_task(&create("low-later", 0)).await.unwrap();

        let pending = store.find_pending(10).await.unwrap();
        let ids: Vec<TaskId> = pending.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![high.id, low.id, low_later.id]);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let store = MemoryTaskStore::new();
        let task = store.create_task(&create("t", 0)).await.unwrap();
        store.mark_running(task.id, Utc::now()).await.unwrap();

        store.update_progress(task.id, 60).await.unwrap();
        store.update_progress(task.id, 40).await.unwrap();

        let task = store.find_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.progress, 60);
    }

    #[tokio::test]
    async fn test_completed_requires_running() {
        let store = MemoryTaskStore::new();
        let task = store.create_task(&create("t", 0)).await.unwrap();

        store.mark_completed(task.id, None).await.unwrap();
        let task = store.find_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_delete_rejects_non_terminal() {
        let store = MemoryTaskStore::new();
        let task = store.create_task(&create("t", 0)).await.unwrap();

        assert!(store.delete_task(task.id).await.is_err());

        store.mark_cancelled(task.id).await.unwrap();
        assert!(store.delete_task(task.id).await.unwrap());
        assert!(store.find_task(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_edge_conflicts() {
        let store = MemoryTaskStore::new();
        let a = store.create_task(&create("a", 0)).await.unwrap();
        let b = store.create_task(&create("b", 0)).await.unwrap();

        let edge = CreateDependency {
            parent_task_id: a.id,
            child_task_id: b.id,
            dependency_type: DependencyType::Success,
        };
        store.create_edge(&edge).await.unwrap();
        assert!(store.create_edge(&edge).await.is_err());
    }

    #[tokio::test]
    async fn test_spawn_recurring_instance_updates_origin_only() {
        let store = MemoryTaskStore::new();
        let origin = store.create_task(&create("origin", 0)).await.unwrap();
        store
            .set_schedule(
                origin.id,
                &ScheduleSpec {
                    schedule_type: "daily".to_string(),
                    schedule_value: Some("1".to_string()),
                    max_runs: None,
                },
                Some(Utc::now()),
            )
            .await
            .unwrap();

        let origin = store.find_task(origin.id).await.unwrap().unwrap();
        let fired_at = Utc::now();
        let instance = store
            .spawn_recurring_instance(
                origin.id,
                fired_at,
                Some(fired_at + chrono::Duration::days(1)),
                true,
                &origin.spawn_instance(),
            )
            .await
            .unwrap();

        assert_eq!(instance.status, TaskStatus::Pending);
        assert!(!instance.is_recurring);
        assert_eq!(instance.run_count, 0);

        let origin = store.find_task(origin.id).await.unwrap().unwrap();
        assert_eq!(origin.run_count, 1);
        assert_eq!(origin.last_run_time, Some(fired_at));
    }
}
