//! Background task orchestration for Dataforge.
//!
//! This crate provides:
//! - A task dispatcher that polls for ready tasks and executes them under a
//!   concurrency bound with cooperative cancellation
//! - A dependency resolver that gates admission and keeps the task graph
//!   acyclic
//! - A recurrence scheduler that fires due schedules and spawns fresh task
//!   instances
//! - The processor contract and registry, plus built-in processor families
//!   for file, URL, and database work
//! - A history recorder that persists an immutable record per execution

pub mod dispatcher;
pub mod history;
pub mod processor;
pub mod processors;
pub mod registry;
pub mod resolver;
pub mod scheduler;

pub use dispatcher::TaskDispatcher;
pub use history::HistoryRecorder;
pub use processor::{ExecutionContext, Processor, ProcessorError};
pub use registry::ProcessorRegistry;
pub use resolver::DependencyResolver;
pub use scheduler::RecurrenceScheduler;
