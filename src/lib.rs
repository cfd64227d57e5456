pub mod channel;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod registry;
pub mod store;

pub use channel::{Message, MessageChannel, TaskDispatch, TaskResult};
pub use config::Config;
pub use core::{FailureReason, Task, TaskGraph, TaskId, TaskStatus};
pub use error::{Error, Result};
pub use orchestration::{Scheduler, Session, SessionId, SessionStatus, Strategy};
pub use registry::{WorkerId, WorkerRegistry, WorkerType};
pub use store::{TaskRecord, TaskStore};
