//! Dependency edge entity and condition enumeration.

pub mod model;

pub use model::{CreateDependency, DependencyType, TaskDependency};
