//! History recorder — writes an immutable execution record after every
//! terminal transition.

use std::sync::Arc;

use serde_json::{Value, json};

use dataforge_core::result::AppResult;
use dataforge_database::TaskStore;
use dataforge_entity::history::{CreateExecutionRecord, ExecutionRecord, ExecutionStats};
use dataforge_entity::task::Task;

/// Scalar result keys copied into the bounded summary verbatim.
const SUMMARY_KEYS: &[&str] = &[
    "summary",
    "count",
    "status",
    "affected_rows",
    "success",
    "rows",
    "pages",
];

/// Persists execution history records. Records are append-only: the core
/// never updates or deletes them.
#[derive(Debug)]
pub struct HistoryRecorder {
    store: Arc<dyn TaskStore>,
}

impl HistoryRecorder {
    /// Create a new recorder over the given store.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Record the terminal execution of a task.
    ///
    /// Returns `Ok(None)` for tasks that never started (e.g. cancelled while
    /// pending): there was no execution, so there is nothing to record.
    pub async fn record(&self, task: &Task) -> AppResult<Option<ExecutionRecord>> {
        let (Some(started_at), Some(completed_at)) = (task.started_at, task.completed_at) else {
            return Ok(None);
        };

        let record = CreateExecutionRecord {
            task_id: task.id,
            task_name: task.name.clone(),
            task_type: task.task_type.clone(),
            status: task.status,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_seconds(),
            result_summary: task.result.as_ref().and_then(bound_summary),
            error_message: task.error_message.clone(),
            owner_id: task.owner_id,
        };

        self.store.record_execution(&record).await.map(Some)
    }

    /// Aggregate statistics over all recorded executions.
    pub async fn stats(&self) -> AppResult<ExecutionStats> {
        self.store.execution_stats().await
    }
}

/// Reduce a result payload to a size-bounded summary.
///
/// Whitelisted scalar keys are copied as-is; a `sample_data` array is
/// reduced to its length and first element. Everything else — in
/// particular large row dumps — is dropped, never copied wholesale.
fn bound_summary(result: &Value) -> Option<Value> {
    let map = result.as_object()?;
    let mut summary = serde_json::Map::new();

    for (key, value) in map {
        if SUMMARY_KEYS.contains(&key.as_str()) {
            summary.insert(key.clone(), value.clone());
        } else if key == "sample_data"
            && let Some(samples) = value.as_array()
        {
            summary.insert("sample_count".to_string(), json!(samples.len()));
            if let Some(first) = samples.first() {
                summary.insert("sample_first".to_string(), first.clone());
            }
        }
    }

    Some(Value::Object(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_keeps_whitelisted_keys() {
        let result = json!({
            "success": true,
            "rows": 1200,
            "column_dump": ["a", "b", "c"],
        });
        let summary = bound_summary(&result).unwrap();
        assert_eq!(summary["success"], json!(true));
        assert_eq!(summary["rows"], json!(1200));
        assert!(summary.get("column_dump").is_none());
    }

    #[test]
    fn test_summary_bounds_sample_data() {
        let result = json!({
            "count": 3,
            "sample_data": [{"row": 1}, {"row": 2}, {"row": 3}],
        });
        let summary = bound_summary(&result).unwrap();
        assert_eq!(summary["sample_count"], json!(3));
        assert_eq!(summary["sample_first"], json!({"row": 1}));
        assert!(summary.get("sample_data").is_none());
    }

    #[test]
    fn test_non_object_results_have_no_summary() {
        assert!(bound_summary(&json!("plain text")).is_none());
        assert!(bound_summary(&json!([1, 2, 3])).is_none());
    }
}
