//! No-op processor.

use async_trait::async_trait;
use serde_json::{Value, json};

use dataforge_entity::task::Task;

use crate::processor::{ExecutionContext, Processor, ProcessorError};

/// Processor that performs no external work.
///
/// Useful for smoke-testing the dispatch pipeline and for anchoring
/// dependency chains. Parameters: `steps` (optional, default 1) controls
/// how many checkpoint/progress iterations run; `pause_ms` (optional)
/// sleeps between steps. Cancellation checkpoint granularity: per step.
#[derive(Debug, Default)]
pub struct NoopProcessor;

#[async_trait]
impl Processor for NoopProcessor {
    fn supported_types(&self) -> &[&'static str] {
        &["noop"]
    }

    fn validate_parameters(&self, _task_type: &str, parameters: &Value) -> bool {
        parameters.get("steps").is_none_or(|v| v.as_u64().is_some())
            && parameters
                .get("pause_ms")
                .is_none_or(|v| v.as_u64().is_some())
    }

    async fn run(&self, task: &Task, ctx: &ExecutionContext) -> Result<Value, ProcessorError> {
        let parameters = task.parameters.clone().unwrap_or(Value::Null);
        let steps = parameters
            .get("steps")
            .and_then(|v| v.as_u64())
            .unwrap_or(1)
            .max(1);
        let pause_ms = parameters
            .get("pause_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        for step in 0..steps {
            ctx.checkpoint()?;
            if pause_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(pause_ms)).await;
            }
            ctx.report_progress(((step + 1) * 100 / steps) as i32).await;
        }

        Ok(json!({ "success": true, "steps": steps }))
    }
}
