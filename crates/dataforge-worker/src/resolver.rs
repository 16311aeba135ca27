//! Dependency resolver — gates admission and keeps the task graph acyclic.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dataforge_core::error::AppError;
use dataforge_core::result::AppResult;
use dataforge_core::types::id::{DependencyId, TaskId};
use dataforge_database::TaskStore;
use dataforge_entity::dependency::{CreateDependency, TaskDependency};
use dataforge_entity::task::Task;

/// Decides whether a pending task's prerequisites are satisfied and
/// enforces acyclicity of the dependency graph.
#[derive(Debug)]
pub struct DependencyResolver {
    store: Arc<dyn TaskStore>,
}

impl DependencyResolver {
    /// Create a new resolver over the given store.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Check whether a task is admission-eligible with respect to its
    /// dependency edges.
    ///
    /// True iff the task does not wait for dependencies, has no incoming
    /// edges, or every incoming edge's parent terminal status matches the
    /// edge condition. Edges whose parent row no longer exists are skipped.
    pub async fn satisfied(&self, task: &Task) -> AppResult<bool> {
        if !task.wait_for_dependencies {
            return Ok(true);
        }

        let edges = self.store.edges_for_child(task.id).await?;
        for edge in edges {
            let Some(parent) = self.store.find_task(edge.parent_task_id).await? else {
                continue;
            };
            if !edge.dependency_type.satisfied_by(parent.status) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Create a dependency edge after validating the graph stays a DAG.
    ///
    /// Rejects edges with missing endpoints, duplicates, self-loops, and
    /// edges whose insertion would close a cycle. Rejection has no partial
    /// effect.
    pub async fn create_edge(&self, data: &CreateDependency) -> AppResult<TaskDependency> {
        if self.store.find_task(data.parent_task_id).await?.is_none() {
            return Err(AppError::not_found(format!(
                "Parent task {} does not exist",
                data.parent_task_id
            )));
        }
        if self.store.find_task(data.child_task_id).await?.is_none() {
            return Err(AppError::not_found(format!(
                "Child task {} does not exist",
                data.child_task_id
            )));
        }
        if data.parent_task_id == data.child_task_id {
            return Err(AppError::dependency_cycle(format!(
                "Task {} cannot depend on itself",
                data.child_task_id
            )));
        }
        if self
            .would_create_cycle(data.parent_task_id, data.child_task_id)
            .await?
        {
            return Err(AppError::dependency_cycle(format!(
                "Dependency from {} to {} would create a cycle",
                data.parent_task_id, data.child_task_id
            )));
        }

        self.store.create_edge(data).await
    }

    /// Delete a dependency edge. Deletion cannot introduce a cycle and is
    /// therefore unrestricted.
    pub async fn delete_edge(&self, id: DependencyId) -> AppResult<bool> {
        self.store.delete_edge(id).await
    }

    /// Breadth-first search over the ancestors of `parent`: if `child` is
    /// already among them, a path child → parent exists and the proposed
    /// edge would close a cycle.
    async fn would_create_cycle(&self, parent: TaskId, child: TaskId) -> AppResult<bool> {
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut queue: VecDeque<TaskId> = VecDeque::from([parent]);

        while let Some(current) = queue.pop_front() {
            if current == child {
                return Ok(true);
            }
            if !visited.insert(current) {
                continue;
            }
            for edge in self.store.edges_for_child(current).await? {
                queue.push_back(edge.parent_task_id);
            }
        }
        Ok(false)
    }
}
