//! Execution history entities.

pub mod model;

pub use model::{CreateExecutionRecord, ExecutionRecord, ExecutionStats};
