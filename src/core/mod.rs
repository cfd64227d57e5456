//! Core data model: tasks and the dependency graph.

pub mod graph;
pub mod task;

pub use graph::TaskGraph;
pub use task::{FailureReason, Task, TaskId, TaskStatus};
