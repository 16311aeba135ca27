//! Task entity, status enumeration, and recurrence schedule types.

pub mod model;
pub mod schedule;
pub mod status;

pub use model::{CreateTask, Task};
pub use schedule::{ScheduleSpec, ScheduleType};
pub use status::TaskStatus;
