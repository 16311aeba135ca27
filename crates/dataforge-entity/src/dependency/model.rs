//! Dependency edge entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use dataforge_core::types::id::{DependencyId, TaskId};

use crate::task::status::TaskStatus;

/// Condition on the parent's terminal status that satisfies an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "dependency_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    /// Parent must have completed successfully.
    Success,
    /// Parent must have failed.
    Failure,
    /// Parent must have reached any terminal state.
    Completion,
}

impl DependencyType {
    /// Check whether the given parent status satisfies this condition.
    pub fn satisfied_by(&self, parent_status: TaskStatus) -> bool {
        match self {
            Self::Success => parent_status == TaskStatus::Completed,
            Self::Failure => parent_status == TaskStatus::Failed,
            Self::Completion => parent_status.is_terminal(),
        }
    }

    /// Return the condition as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Completion => "completion",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed child-depends-on-parent edge in the task graph.
///
/// Invariant: the edge set is always a DAG. Edges are created and deleted,
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskDependency {
    /// Unique edge identifier.
    pub id: DependencyId,
    /// The task that must reach a terminal state first.
    pub parent_task_id: TaskId,
    /// The task gated on the parent.
    pub child_task_id: TaskId,
    /// Condition on the parent's terminal status.
    pub dependency_type: DependencyType,
    /// When the edge was created.
    pub created_at: DateTime<Utc>,
}

/// Data required to create a new dependency edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDependency {
    /// The parent task.
    pub parent_task_id: TaskId,
    /// The child task.
    pub child_task_id: TaskId,
    /// Condition on the parent's terminal status.
    pub dependency_type: DependencyType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_condition() {
        assert!(DependencyType::Success.satisfied_by(TaskStatus::Completed));
        assert!(!DependencyType::Success.satisfied_by(TaskStatus::Failed));
        assert!(!DependencyType::Success.satisfied_by(TaskStatus::Running));
    }

    #[test]
    fn test_failure_condition() {
        assert!(DependencyType::Failure.satisfied_by(TaskStatus::Failed));
        assert!(!DependencyType::Failure.satisfied_by(TaskStatus::Completed));
    }

    #[test]
    fn test_completion_condition() {
        assert!(DependencyType::Completion.satisfied_by(TaskStatus::Completed));
        assert!(DependencyType::Completion.satisfied_by(TaskStatus::Failed));
        assert!(DependencyType::Completion.satisfied_by(TaskStatus::Cancelled));
        assert!(!DependencyType::Completion.satisfied_by(TaskStatus::Pending));
    }
}
