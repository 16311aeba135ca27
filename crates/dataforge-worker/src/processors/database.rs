//! Database processor family: SQL maintenance against a caller-supplied
//! PostgreSQL database.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use dataforge_entity::task::Task;

use crate::processor::{ExecutionContext, Processor, ProcessorError};

/// Rows deleted per statement batch.
const DEFAULT_BATCH_SIZE: u64 = 500;

/// Processor for SQL tasks against an external PostgreSQL database named by
/// the `connection_url` parameter.
///
/// Supported types: `database_query` (read-only row counting for a SELECT
/// statement) and `database_clean` (batched deletes of rows matching a
/// predicate). Cancellation checkpoint granularity: one check per statement
/// batch, so worst-case cancellation latency is one batch.
#[derive(Debug, Default)]
pub struct DatabaseProcessor;

#[async_trait]
impl Processor for DatabaseProcessor {
    fn supported_types(&self) -> &[&'static str] {
        &["database_query", "database_clean"]
    }

    fn validate_parameters(&self, task_type: &str, parameters: &Value) -> bool {
        let has_connection = parameters
            .get("connection_url")
            .is_some_and(|v| v.is_string());
        match task_type {
            "database_query" => {
                has_connection
                    && parameters
                        .get("query")
                        .and_then(|v| v.as_str())
                        .is_some_and(is_select)
            }
            "database_clean" => {
                has_connection
                    && parameters
                        .get("table")
                        .and_then(|v| v.as_str())
                        .is_some_and(is_identifier)
                    && parameters.get("filter").is_some_and(|v| v.is_string())
            }
            _ => false,
        }
    }

    async fn run(&self, task: &Task, ctx: &ExecutionContext) -> Result<Value, ProcessorError> {
        let parameters = task.parameters.clone().unwrap_or(Value::Null);
        let connection_url = parameters
            .get("connection_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProcessorError::failed("Missing 'connection_url' parameter"))?;

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(connection_url)
            .await
            .map_err(|e| ProcessorError::failed(format!("Failed to connect: {e}")))?;
        ctx.report_progress(10).await;

        let result = match task.task_type.as_str() {
            "database_query" => self.query(&pool, &parameters, ctx).await,
            "database_clean" => self.clean(&pool, &parameters, ctx).await,
            other => Err(ProcessorError::failed(format!(
                "Unsupported task type: '{other}'"
            ))),
        };

        pool.close().await;
        result
    }
}

impl DatabaseProcessor {
    /// Execute a SELECT and report the row count plus a first-row preview.
    async fn query(
        &self,
        pool: &PgPool,
        parameters: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ProcessorError> {
        let query = parameters
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProcessorError::failed("Missing 'query' parameter"))?;
        if !is_select(query) {
            return Err(ProcessorError::failed(
                "Only SELECT statements are allowed for database_query",
            ));
        }

        ctx.checkpoint()?;
        let rows = sqlx::query(query)
            .fetch_all(pool)
            .await
            .map_err(|e| ProcessorError::failed(format!("Query failed: {e}")))?;
        ctx.report_progress(90).await;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| sqlx::Column::name(c).to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(json!({
            "success": true,
            "rows": rows.len(),
            "columns": columns,
        }))
    }

    /// Delete rows matching the predicate in bounded batches, checking the
    /// cancellation token between batches.
    async fn clean(
        &self,
        pool: &PgPool,
        parameters: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ProcessorError> {
        let table = parameters
            .get("table")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProcessorError::failed("Missing 'table' parameter"))?;
        if !is_identifier(table) {
            return Err(ProcessorError::failed(format!(
                "Invalid table name: '{table}'"
            )));
        }
        let filter = parameters
            .get("filter")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProcessorError::failed("Missing 'filter' parameter"))?;
        let batch_size = parameters
            .get("batch_size")
            .and_then(|v| v.as_u64())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        // Postgres DELETE has no LIMIT; batching goes through ctid.
        let statement = format!(
            "DELETE FROM {table} WHERE ctid IN \
             (SELECT ctid FROM {table} WHERE {filter} LIMIT {batch_size})"
        );

        let mut affected_rows: u64 = 0;
        let mut batches: u32 = 0;
        loop {
            ctx.checkpoint()?;
            let result = sqlx::query(&statement)
                .execute(pool)
                .await
                .map_err(|e| ProcessorError::failed(format!("Delete batch failed: {e}")))?;

            let deleted = result.rows_affected();
            affected_rows += deleted;
            batches += 1;
            ctx.report_progress((10 + batches.min(16) * 5) as i32).await;

            if deleted < batch_size {
                break;
            }
        }

        debug!(affected_rows, batches, "Database clean finished");
        Ok(json!({
            "success": true,
            "affected_rows": affected_rows,
            "batches": batches,
        }))
    }
}

/// Check that a statement is a plain SELECT.
fn is_select(query: &str) -> bool {
    query.trim_start().to_ascii_lowercase().starts_with("select")
}

/// Check that a string is a bare SQL identifier (no quoting, no injection
/// surface).
fn is_identifier(name: &str) -> bool {
    static IDENTIFIER: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
        .is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_must_be_select() {
        let processor = DatabaseProcessor;
        let params = |query: &str| {
            json!({"connection_url": "postgres://localhost/x", "query": query})
        };
        assert!(processor.validate_parameters("database_query", &params("SELECT 1")));
        assert!(processor.validate_parameters("database_query", &params("  select * from t")));
        assert!(!processor.validate_parameters("database_query", &params("DROP TABLE t")));
    }

    #[test]
    fn test_clean_table_must_be_identifier() {
        let processor = DatabaseProcessor;
        let params = |table: &str| {
            json!({
                "connection_url": "postgres://localhost/x",
                "table": table,
                "filter": "value IS NULL",
            })
        };
        assert!(processor.validate_parameters("database_clean", &params("measurements")));
        assert!(!processor.validate_parameters("database_clean", &params("t; DROP TABLE u")));
    }
}
