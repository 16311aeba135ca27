//! Recurrence scheduler — fires due schedules and spawns fresh task
//! instances.
//!
//! The scheduler only touches recurrence bookkeeping on origin rows; the
//! instances it spawns are plain pending tasks that go through the
//! dispatcher's normal admission. Firing does not guarantee immediate
//! execution.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info, warn};

use dataforge_core::config::scheduler::SchedulerConfig;
use dataforge_core::error::AppError;
use dataforge_core::result::AppResult;
use dataforge_core::types::id::TaskId;
use dataforge_database::TaskStore;
use dataforge_entity::task::{ScheduleSpec, ScheduleType, Task};

/// Periodic loop that fires due recurring tasks.
#[derive(Debug)]
pub struct RecurrenceScheduler {
    store: Arc<dyn TaskStore>,
    config: SchedulerConfig,
}

impl RecurrenceScheduler {
    /// Create a new scheduler.
    pub fn new(store: Arc<dyn TaskStore>, config: SchedulerConfig) -> Self {
        Self { store, config }
    }

    /// Start the scheduling loop — runs until the shutdown signal is
    /// received. Per-cycle errors are logged and retried next cycle.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = self.config.poll_interval_seconds,
            "Recurrence scheduler started"
        );

        let poll_interval = StdDuration::from_secs(self.config.poll_interval_seconds);

        loop {
            if let Err(e) = self.run_cycle(Utc::now()).await {
                error!("Schedule cycle failed, retrying next cycle: {e}");
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Recurrence scheduler received shutdown signal");
                        break;
                    }
                }
                _ = time::sleep(poll_interval) => {}
            }
        }

        info!("Recurrence scheduler stopped");
    }

    /// Execute one poll cycle at the given instant. Returns the number of
    /// instances spawned. Per-origin failures are isolated: one broken
    /// schedule never stops the others from firing.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let due = self.store.find_due_recurring(now).await?;
        if due.is_empty() {
            return Ok(0);
        }

        info!(count = due.len(), "Found due recurring tasks");
        let mut spawned = 0;
        for origin in due {
            match self.fire(&origin, now).await {
                Ok(Some(instance)) => {
                    info!(
                        origin_id = %origin.id,
                        instance_id = %instance.id,
                        "Fired schedule"
                    );
                    spawned += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(origin_id = %origin.id, "Failed to fire schedule: {e}");
                }
            }
        }
        Ok(spawned)
    }

    /// Attach a recurrence policy to a task. A `once` schedule fires at the
    /// next cycle and then disables itself; interval and cron schedules get
    /// their first fire time computed from now.
    pub async fn attach(&self, task_id: TaskId, spec: &ScheduleSpec) -> AppResult<()> {
        if self.store.find_task(task_id).await?.is_none() {
            return Err(AppError::not_found(format!("Task {task_id} not found")));
        }

        let now = Utc::now();
        let first_run = match ScheduleType::parse(&spec.schedule_type) {
            Some(ScheduleType::Once) => Some(now),
            _ => next_run_time(
                Some(spec.schedule_type.as_str()),
                spec.schedule_value.as_deref(),
                now,
            ),
        };

        self.store.set_schedule(task_id, spec, first_run).await?;
        info!(task_id = %task_id, schedule_type = %spec.schedule_type, "Schedule attached");
        Ok(())
    }

    /// Detach a task's recurrence policy.
    pub async fn detach(&self, task_id: TaskId) -> AppResult<()> {
        self.store.clear_schedule(task_id).await?;
        info!(task_id = %task_id, "Schedule detached");
        Ok(())
    }

    /// Fire one due origin: enforce the run limit, then atomically spawn
    /// the instance and advance the origin's bookkeeping.
    async fn fire(&self, origin: &Task, now: DateTime<Utc>) -> AppResult<Option<Task>> {
        if let Some(max_runs) = origin.max_runs
            && origin.run_count >= max_runs
        {
            info!(
                origin_id = %origin.id,
                max_runs,
                "Schedule reached its run limit, disabling"
            );
            self.store.disable_recurrence(origin.id).await?;
            return Ok(None);
        }

        let next = next_run_time(
            origin.schedule_type.as_deref(),
            origin.schedule_value.as_deref(),
            now,
        );
        let instance = self
            .store
            .spawn_recurring_instance(origin.id, now, next, next.is_some(), &origin.spawn_instance())
            .await?;
        Ok(Some(instance))
    }
}

/// Compute the next fire time after `now`, or `None` when the schedule is
/// exhausted (`once`).
///
/// Missing or unrecognized schedule types fall back to daily. An
/// unparsable cron expression also falls back to daily rather than halting
/// the scheduler.
pub fn next_run_time(
    schedule_type: Option<&str>,
    schedule_value: Option<&str>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let parsed = schedule_type.and_then(ScheduleType::parse);
    if schedule_type.is_some() && parsed.is_none() {
        warn!(
            schedule_type = schedule_type.unwrap_or_default(),
            "Unrecognized schedule type, treating as daily"
        );
    }

    match parsed {
        Some(ScheduleType::Once) => None,
        Some(ScheduleType::Weekly) => Some(now + Duration::weeks(interval(schedule_value))),
        Some(ScheduleType::Monthly) => Some(now + Duration::days(30 * interval(schedule_value))),
        Some(ScheduleType::Cron) => Some(next_cron_time(schedule_value, now)),
        Some(ScheduleType::Daily) | None => Some(now + Duration::days(interval(schedule_value))),
    }
}

/// Parse the interval multiplier from a schedule value, defaulting to 1.
fn interval(schedule_value: Option<&str>) -> i64 {
    schedule_value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1)
}

/// Evaluate a cron expression for the next fire time after `now`, falling
/// back to daily semantics when the expression cannot be parsed or yields
/// no future fire time.
fn next_cron_time(expression: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let daily = now + Duration::days(1);
    let Some(expression) = expression else {
        warn!("Cron schedule has no expression, treating as daily");
        return daily;
    };

    match cron::Schedule::from_str(expression) {
        Ok(schedule) => schedule.after(&now).next().unwrap_or_else(|| {
            warn!(expression, "Cron expression has no future fire time, treating as daily");
            daily
        }),
        Err(e) => {
            warn!(expression, "Failed to parse cron expression ({e}), treating as daily");
            daily
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_once_is_exhausted_after_firing() {
        assert_eq!(next_run_time(Some("once"), None, Utc::now()), None);
    }

    #[test]
    fn test_interval_schedules() {
        let now = at("2024-03-01T12:00:00Z");
        assert_eq!(
            next_run_time(Some("daily"), Some("3"), now),
            Some(at("2024-03-04T12:00:00Z"))
        );
        assert_eq!(
            next_run_time(Some("weekly"), None, now),
            Some(at("2024-03-08T12:00:00Z"))
        );
        assert_eq!(
            next_run_time(Some("monthly"), Some("2"), now),
            Some(at("2024-04-30T12:00:00Z"))
        );
    }

    #[test]
    fn test_non_numeric_interval_defaults_to_one() {
        let now = at("2024-03-01T12:00:00Z");
        assert_eq!(
            next_run_time(Some("daily"), Some("soon"), now),
            Some(at("2024-03-02T12:00:00Z"))
        );
    }

    #[test]
    fn test_missing_or_unknown_type_treated_as_daily() {
        let now = at("2024-03-01T12:00:00Z");
        let tomorrow = Some(at("2024-03-02T12:00:00Z"));
        assert_eq!(next_run_time(None, None, now), tomorrow);
        assert_eq!(next_run_time(Some("fortnightly"), None, now), tomorrow);
    }

    #[test]
    fn test_cron_schedule() {
        let now = at("2024-03-01T12:30:00Z");
        // Every day at 06:00 UTC.
        let next = next_run_time(Some("cron"), Some("0 0 6 * * *"), now);
        assert_eq!(next, Some(at("2024-03-02T06:00:00Z")));
    }

    #[test]
    fn test_invalid_cron_falls_back_to_daily() {
        let now = at("2024-03-01T12:00:00Z");
        assert_eq!(
            next_run_time(Some("cron"), Some("not a cron expr"), now),
            Some(at("2024-03-02T12:00:00Z"))
        );
        assert_eq!(
            next_run_time(Some("cron"), None, now),
            Some(at("2024-03-02T12:00:00Z"))
        );
    }
}
