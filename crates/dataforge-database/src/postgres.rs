//! PostgreSQL implementation of the task store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use dataforge_core::error::{AppError, ErrorKind};
use dataforge_core::result::AppResult;
use dataforge_core::types::id::{DependencyId, TaskId};
use dataforge_core::types::pagination::{PageRequest, PageResponse};
use dataforge_entity::dependency::{CreateDependency, TaskDependency};
use dataforge_entity::history::{CreateExecutionRecord, ExecutionRecord, ExecutionStats};
use dataforge_entity::task::{CreateTask, ScheduleSpec, Task};

use crate::store::{TaskFilter, TaskStore};

/// Task store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    /// Create a new PostgreSQL task store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn db_err(context: &str, e: sqlx::Error) -> AppError {
        AppError::with_source(ErrorKind::Database, context.to_string(), e)
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create_task(&self, data: &CreateTask) -> AppResult<Task> {
        sqlx::query_as::<_, Task>(
            "INSERT INTO tasks \
             (name, description, task_type, priority, parameters, wait_for_dependencies, owner_id, source_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(&data.name)
        .bind(&data.description)
        .bind(&data.task_type)
        .bind(data.priority)
        .bind(&data.parameters)
        .bind(data.wait_for_dependencies)
        .bind(data.owner_id)
        .bind(data.source_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to create task", e))
    }

    async fn find_task(&self, id: TaskId) -> AppResult<Option<Task>> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::db_err("Failed to find task", e))
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Task>> {
        fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &TaskFilter) {
            if let Some(status) = filter.status {
                qb.push(" AND status = ").push_bind(status);
            }
            if let Some(task_type) = &filter.task_type {
                qb.push(" AND task_type = ").push_bind(task_type.clone());
            }
            if let Some(source_id) = filter.source_id {
                qb.push(" AND source_id = ").push_bind(source_id);
            }
            if let Some(owner_id) = filter.owner_id {
                qb.push(" AND owner_id = ").push_bind(owner_id);
            }
            if let Some(search) = &filter.search {
                let pattern = format!("%{search}%");
                qb.push(" AND (name ILIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR description ILIKE ")
                    .push_bind(pattern)
                    .push(")");
            }
        }

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM tasks WHERE TRUE");
        push_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::db_err("Failed to count tasks", e))?;

        let mut qb = QueryBuilder::new("SELECT * FROM tasks WHERE TRUE");
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        let tasks = qb
            .build_query_as::<Task>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::db_err("Failed to list tasks", e))?;

        Ok(PageResponse::new(
            tasks,
            page.page,
            page.page_size,
            total as u64,
        ))
    }

    async fn find_pending(&self, limit: u32) -> AppResult<Vec<Task>> {
        sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE status = 'pending' \
             ORDER BY priority DESC, created_at ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to fetch pending tasks", e))
    }

    async fn find_due_recurring(&self, now: DateTime<Utc>) -> AppResult<Vec<Task>> {
        sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE is_recurring \
             AND next_run_time IS NOT NULL AND next_run_time <= $1 \
             AND status IN ('completed', 'failed', 'cancelled')",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to fetch due recurring tasks", e))
    }

    async fn mark_running(&self, id: TaskId, started_at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET status = 'running', progress = 0, started_at = $2, \
             updated_at = NOW() WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to mark task running", e))?;
        Ok(())
    }

    async fn update_progress(&self, id: TaskId, progress: i32) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET progress = GREATEST(progress, $2), updated_at = NOW() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(progress.clamp(0, 100))
        .execute(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to update task progress", e))?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: TaskId,
        result: Option<&serde_json::Value>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET status = 'completed', progress = 100, result = $2, \
             completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to mark task completed", e))?;
        Ok(())
    }

    async fn mark_failed(&self, id: TaskId, error: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET status = 'failed', error_message = $2, \
             completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'running')",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to mark task failed", e))?;
        Ok(())
    }

    async fn mark_cancelled(&self, id: TaskId) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET status = 'cancelled', completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'running')",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to mark task cancelled", e))?;
        Ok(())
    }

    async fn set_schedule(
        &self,
        id: TaskId,
        spec: &ScheduleSpec,
        next_run_time: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET is_recurring = TRUE, schedule_type = $2, schedule_value = $3, \
             max_runs = $4, next_run_time = $5, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(&spec.schedule_type)
        .bind(&spec.schedule_value)
        .bind(spec.max_runs)
        .bind(next_run_time)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to set task schedule", e))?;
        Ok(())
    }

    async fn clear_schedule(&self, id: TaskId) -> AppResult<()> {
        sqlx::query(
            "UPDATE tasks SET is_recurring = FALSE, next_run_time = NULL, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to clear task schedule", e))?;
        Ok(())
    }

    async fn disable_recurrence(&self, id: TaskId) -> AppResult<()> {
        sqlx::query("UPDATE tasks SET is_recurring = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::db_err("Failed to disable recurrence", e))?;
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
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Self::db_err("Failed to begin transaction", e))?;

        let task = sqlx::query_as::<_, Task>(
            "INSERT INTO tasks \
             (name, description, task_type, priority, parameters, wait_for_dependencies, owner_id, source_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(&instance.name)
        .bind(&instance.description)
        .bind(&instance.task_type)
        .bind(instance.priority)
        .bind(&instance.parameters)
        .bind(instance.wait_for_dependencies)
        .bind(instance.owner_id)
        .bind(instance.source_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Self::db_err("Failed to insert recurring instance", e))?;

        sqlx::query(
            "UPDATE tasks SET run_count = run_count + 1, last_run_time = $2, \
             next_run_time = $3, is_recurring = $4, updated_at = NOW() WHERE id = $1",
        )
        .bind(origin_id)
        .bind(fired_at)
        .bind(next_run_time)
        .bind(keep_recurring)
        .execute(&mut *tx)
        .await
        .map_err(|e| Self::db_err("Failed to advance recurrence origin", e))?;

        tx.commit()
            .await
            .map_err(|e| Self::db_err("Failed to commit recurrence firing", e))?;

        Ok(task)
    }

    async fn delete_task(&self, id: TaskId) -> AppResult<bool> {
        let Some(task) = self.find_task(id).await? else {
            return Ok(false);
        };
        if !task.is_terminal() {
            return Err(AppError::validation(format!(
                "Task {id} is {} and cannot be deleted; only terminal tasks may be deleted",
                task.status
            )));
        }

        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::db_err("Failed to delete task", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_edge(&self, data: &CreateDependency) -> AppResult<TaskDependency> {
        sqlx::query_as::<_, TaskDependency>(
            "INSERT INTO task_dependencies (parent_task_id, child_task_id, dependency_type) \
             VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(data.parent_task_id)
        .bind(data.child_task_id)
        .bind(data.dependency_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|d| d.is_unique_violation())
            {
                AppError::conflict(format!(
                    "Dependency from {} to {} already exists",
                    data.parent_task_id, data.child_task_id
                ))
            } else {
                Self::db_err("Failed to create dependency edge", e)
            }
        })
    }

    async fn delete_edge(&self, id: DependencyId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM task_dependencies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::db_err("Failed to delete dependency edge", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn edges_for_child(&self, child: TaskId) -> AppResult<Vec<TaskDependency>> {
        sqlx::query_as::<_, TaskDependency>(
            "SELECT * FROM task_dependencies WHERE child_task_id = $1",
        )
        .bind(child)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to list edges for child", e))
    }

    async fn edges_for_parent(&self, parent: TaskId) -> AppResult<Vec<TaskDependency>> {
        sqlx::query_as::<_, TaskDependency>(
            "SELECT * FROM task_dependencies WHERE parent_task_id = $1",
        )
        .bind(parent)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to list edges for parent", e))
    }

    async fn record_execution(
        &self,
        data: &CreateExecutionRecord,
    ) -> AppResult<ExecutionRecord> {
        sqlx::query_as::<_, ExecutionRecord>(
            "INSERT INTO task_execution_history \
             (task_id, task_name, task_type, status, started_at, completed_at, \
              duration_seconds, result_summary, error_message, owner_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING *",
        )
        .bind(data.task_id)
        .bind(&data.task_name)
        .bind(&data.task_type)
        .bind(data.status)
        .bind(data.started_at)
        .bind(data.completed_at)
        .bind(data.duration_seconds)
        .bind(&data.result_summary)
        .bind(&data.error_message)
        .bind(data.owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to record execution", e))
    }

    async fn history_for_task(
        &self,
        task_id: TaskId,
        page: &PageRequest,
    ) -> AppResult<Vec<ExecutionRecord>> {
        sqlx::query_as::<_, ExecutionRecord>(
            "SELECT * FROM task_execution_history WHERE task_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(task_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to fetch task history", e))
    }

    async fn execution_stats(&self) -> AppResult<ExecutionStats> {
        let (total, success, failure, cancelled, avg): (i64, i64, i64, i64, Option<f64>) =
            sqlx::query_as(
                "SELECT COUNT(*), \
                 COUNT(*) FILTER (WHERE status = 'completed'), \
                 COUNT(*) FILTER (WHERE status = 'failed'), \
                 COUNT(*) FILTER (WHERE status = 'cancelled'), \
                 AVG(duration_seconds)::float8 \
                 FROM task_execution_history",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::db_err("Failed to aggregate execution stats", e))?;

        let per_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT task_type, COUNT(*) FROM task_execution_history GROUP BY task_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::db_err("Failed to aggregate per-type stats", e))?;

        Ok(ExecutionStats {
            total_count: total,
            success_count: success,
            failure_count: failure,
            cancelled_count: cancelled,
            avg_duration_seconds: avg.unwrap_or(0.0),
            per_type: per_type.into_iter().collect(),
        })
    }
}
