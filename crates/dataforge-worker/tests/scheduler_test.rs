//! Recurrence scheduler integration tests: firing, run limits, and
//! bookkeeping isolation between origins and instances.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use dataforge_core::config::scheduler::SchedulerConfig;
use dataforge_database::{MemoryTaskStore, TaskStore};
use dataforge_entity::task::{ScheduleSpec, TaskStatus};
use dataforge_worker::RecurrenceScheduler;

use common::create_task;

fn scheduler_with(store: &Arc<MemoryTaskStore>) -> RecurrenceScheduler {
    RecurrenceScheduler::new(
        Arc::clone(store) as Arc<dyn TaskStore>,
        SchedulerConfig::default(),
    )
}

fn daily(max_runs: Option<i32>) -> ScheduleSpec {
    ScheduleSpec {
        schedule_type: "daily".to_string(),
        schedule_value: Some("1".to_string()),
        max_runs,
    }
}

/// Create a terminal origin task carrying the given schedule.
async fn terminal_origin(
    store: &Arc<MemoryTaskStore>,
    scheduler: &RecurrenceScheduler,
    spec: ScheduleSpec,
) -> dataforge_entity::task::Task {
    let task = create_task(store, "origin", "noop").await;
    store.mark_cancelled(task.id).await.unwrap();
    scheduler.attach(task.id, &spec).await.unwrap();
    store.find_task(task.id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_max_runs_caps_instances_and_disables_recurrence() {
    let store = Arc::new(MemoryTaskStore::new());
    let scheduler = scheduler_with(&store);
    let origin = terminal_origin(&store, &scheduler, daily(Some(2))).await;

    // First firing.
    let fire_one = Utc::now() + Duration::days(2);
    assert_eq!(scheduler.run_cycle(fire_one).await.unwrap(), 1);
    let after_one = store.find_task(origin.id).await.unwrap().unwrap();
    assert_eq!(after_one.run_count, 1);
    assert_eq!(after_one.last_run_time, Some(fire_one));
    assert!(after_one.is_recurring);

    // Second firing.
    let fire_two = fire_one + Duration::days(2);
    assert_eq!(scheduler.run_cycle(fire_two).await.unwrap(), 1);
    assert_eq!(store.find_pending(10).await.unwrap().len(), 2);

    // Third due cycle: the limit is reached, recurrence turns off, and no
    // instance is produced.
    let fire_three = fire_two + Duration::days(2);
    assert_eq!(scheduler.run_cycle(fire_three).await.unwrap(), 0);
    let exhausted = store.find_task(origin.id).await.unwrap().unwrap();
    assert!(!exhausted.is_recurring);
    assert_eq!(exhausted.run_count, 2);
    assert_eq!(store.find_pending(10).await.unwrap().len(), 2);

    // Even another elapsed interval produces nothing further.
    assert_eq!(
        scheduler.run_cycle(fire_three + Duration::days(2)).await.unwrap(),
        0
    );
    assert_eq!(store.find_pending(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_instances_carry_no_recurrence_bookkeeping() {
    let store = Arc::new(MemoryTaskStore::new());
    let scheduler = scheduler_with(&store);
    let origin = terminal_origin(&store, &scheduler, daily(None)).await;

    scheduler
        .run_cycle(Utc::now() + Duration::days(2))
        .await
        .unwrap();

    let instance = store.find_pending(10).await.unwrap().remove(0);
    assert_ne!(instance.id, origin.id);
    assert_eq!(instance.name, origin.name);
    assert_eq!(instance.task_type, origin.task_type);
    assert_eq!(instance.status, TaskStatus::Pending);
    assert!(!instance.is_recurring);
    assert_eq!(instance.run_count, 0);
    assert!(instance.next_run_time.is_none());
    assert!(instance.last_run_time.is_none());
}

#[tokio::test]
async fn test_origin_not_fired_while_previous_run_unfinished() {
    let store = Arc::new(MemoryTaskStore::new());
    let scheduler = scheduler_with(&store);

    // Origin still pending: the terminal-status filter keeps it out even
    // though its next_run_time has elapsed.
    let task = create_task(&store, "busy-origin", "noop").await;
    scheduler.attach(task.id, &daily(None)).await.unwrap();

    assert_eq!(
        scheduler.run_cycle(Utc::now() + Duration::days(2)).await.unwrap(),
        0
    );
    assert_eq!(store.find_pending(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_once_schedule_fires_a_single_time() {
    let store = Arc::new(MemoryTaskStore::new());
    let scheduler = scheduler_with(&store);
    let origin = terminal_origin(
        &store,
        &scheduler,
        ScheduleSpec {
            schedule_type: "once".to_string(),
            schedule_value: None,
            max_runs: None,
        },
    )
    .await;

    // Attach gave a once schedule an immediate first fire time.
    assert!(origin.next_run_time.is_some());

    assert_eq!(scheduler.run_cycle(Utc::now() + Duration::hours(1)).await.unwrap(), 1);
    let origin = store.find_task(origin.id).await.unwrap().unwrap();
    assert!(!origin.is_recurring);
    assert!(origin.next_run_time.is_none());

    assert_eq!(
        scheduler.run_cycle(Utc::now() + Duration::days(3)).await.unwrap(),
        0
    );
    assert_eq!(store.find_pending(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_deleted_origin_does_not_stop_the_cycle() {
    let store = Arc::new(MemoryTaskStore::new());
    let scheduler = scheduler_with(&store);

    let healthy = terminal_origin(&store, &scheduler, daily(None)).await;
    let removed = terminal_origin(&store, &scheduler, daily(None)).await;
    store.delete_task(removed.id).await.unwrap();

    // The removed origin drops out of the due set; the rest still fire.
    assert_eq!(
        scheduler.run_cycle(Utc::now() + Duration::days(2)).await.unwrap(),
        1
    );
    let healthy = store.find_task(healthy.id).await.unwrap().unwrap();
    assert_eq!(healthy.run_count, 1);
}

#[tokio::test]
async fn test_detach_stops_firing() {
    let store = Arc::new(MemoryTaskStore::new());
    let scheduler = scheduler_with(&store);
    let origin = terminal_origin(&store, &scheduler, daily(None)).await;

    scheduler.detach(origin.id).await.unwrap();
    assert_eq!(
        scheduler.run_cycle(Utc::now() + Duration::days(2)).await.unwrap(),
        0
    );
    assert!(store.find_pending(10).await.unwrap().is_empty());
}
