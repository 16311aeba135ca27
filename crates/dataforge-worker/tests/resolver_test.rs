//! Dependency resolver integration tests: acyclicity enforcement and
//! admission gating.

mod common;

use std::sync::Arc;

use dataforge_core::error::ErrorKind;
use dataforge_database::{MemoryTaskStore, TaskStore};
use dataforge_entity::dependency::{CreateDependency, DependencyType};
use dataforge_entity::task::CreateTask;

use common::{create_task, resolver_with};

fn edge(
    parent: dataforge_core::types::id::TaskId,
    child: dataforge_core::types::id::TaskId,
    dependency_type: DependencyType,
) -> CreateDependency {
    CreateDependency {
        parent_task_id: parent,
        child_task_id: child,
        dependency_type,
    }
}

#[tokio::test]
async fn test_self_loop_rejected() {
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = resolver_with(&store);
    let x = create_task(&store, "x", "noop").await;

    let err = resolver
        .create_edge(&edge(x.id, x.id, DependencyType::Success))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DependencyCycle);
}

#[tokio::test]
async fn test_reverse_edge_rejected_and_not_persisted() {
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = resolver_with(&store);
    let x = create_task(&store, "x", "noop").await;
    let y = create_task(&store, "y", "noop").await;

    resolver
        .create_edge(&edge(x.id, y.id, DependencyType::Success))
        .await
        .unwrap();

    let err = resolver
        .create_edge(&edge(y.id, x.id, DependencyType::Success))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DependencyCycle);

    // The rejected edge left no trace.
    assert!(store.edges_for_child(x.id).await.unwrap().is_empty());
    assert_eq!(store.edges_for_parent(x.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_transitive_cycle_rejected() {
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = resolver_with(&store);
    let a = create_task(&store, "a", "noop").await;
    let b = create_task(&store, "b", "noop").await;
    let c = create_task(&store, "c", "noop").await;

    resolver
        .create_edge(&edge(a.id, b.id, DependencyType::Success))
        .await
        .unwrap();
    resolver
        .create_edge(&edge(b.id, c.id, DependencyType::Success))
        .await
        .unwrap();

    let err = resolver
        .create_edge(&edge(c.id, a.id, DependencyType::Success))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DependencyCycle);

    // Diamonds are fine: a → b, a → c via another parent is not a cycle.
    resolver
        .create_edge(&edge(a.id, c.id, DependencyType::Success))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dangling_endpoints_rejected() {
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = resolver_with(&store);
    let x = create_task(&store, "x", "noop").await;
    let ghost = dataforge_core::types::id::TaskId::new();

    let err = resolver
        .create_edge(&edge(ghost, x.id, DependencyType::Success))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let err = resolver
        .create_edge(&edge(x.id, ghost, DependencyType::Success))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_duplicate_edge_rejected() {
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = resolver_with(&store);
    let x = create_task(&store, "x", "noop").await;
    let y = create_task(&store, "y", "noop").await;

    resolver
        .create_edge(&edge(x.id, y.id, DependencyType::Success))
        .await
        .unwrap();
    let err = resolver
        .create_edge(&edge(x.id, y.id, DependencyType::Completion))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn test_no_edges_means_satisfied() {
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = resolver_with(&store);
    let task = create_task(&store, "solo", "noop").await;

    assert!(resolver.satisfied(&task).await.unwrap());
}

#[tokio::test]
async fn test_wait_for_dependencies_false_is_always_eligible() {
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = resolver_with(&store);
    let parent = create_task(&store, "parent", "noop").await;
    let child = store
        .create_task(&CreateTask {
            wait_for_dependencies: false,
            ..CreateTask::new("child", "noop")
        })
        .await
        .unwrap();

    resolver
        .create_edge(&edge(parent.id, child.id, DependencyType::Success))
        .await
        .unwrap();

    // Parent is still pending, but the child opted out of gating.
    assert!(resolver.satisfied(&child).await.unwrap());
}

#[tokio::test]
async fn test_success_edge_with_failed_parent_never_satisfied() {
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = resolver_with(&store);
    let parent = create_task(&store, "parent", "noop").await;
    let child = create_task(&store, "child", "noop").await;

    resolver
        .create_edge(&edge(parent.id, child.id, DependencyType::Success))
        .await
        .unwrap();

    store.mark_failed(parent.id, "boom").await.unwrap();
    assert!(!resolver.satisfied(&child).await.unwrap());
}

#[tokio::test]
async fn test_completion_edge_satisfied_by_any_terminal_parent() {
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = resolver_with(&store);
    let parent = create_task(&store, "parent", "noop").await;
    let child = create_task(&store, "child", "noop").await;

    resolver
        .create_edge(&edge(parent.id, child.id, DependencyType::Completion))
        .await
        .unwrap();
    assert!(!resolver.satisfied(&child).await.unwrap());

    store.mark_failed(parent.id, "boom").await.unwrap();
    assert!(resolver.satisfied(&child).await.unwrap());
}

#[tokio::test]
async fn test_edge_deletion_unblocks_child() {
    let store = Arc::new(MemoryTaskStore::new());
    let resolver = resolver_with(&store);
    let parent = create_task(&store, "parent", "noop").await;
    let child = create_task(&store, "child", "noop").await;

    let edge_row = resolver
        .create_edge(&edge(parent.id, child.id, DependencyType::Success))
        .await
        .unwrap();
    assert!(!resolver.satisfied(&child).await.unwrap());

    assert!(resolver.delete_edge(edge_row.id).await.unwrap());
    assert!(resolver.satisfied(&child).await.unwrap());
}
