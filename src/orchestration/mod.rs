//! Orchestration layer: planning, workers, and session scheduling.
//!
//! The pieces compose top-down: the [`Scheduler`](scheduler::Scheduler)
//! asks the [`Planner`](planner::Planner) for a task graph, grows the pool
//! if the strategy calls for it, and drives the dispatch protocol against
//! worker loops from [`worker`]. The completion service behind the planner
//! lives in [`completion`].

pub mod completion;
pub mod planner;
pub mod scheduler;
pub mod worker;

pub use completion::{CompletionService, HeadlessCompletion};
pub use planner::{Plan, Planner};
pub use scheduler::{Scheduler, Session, SessionId, SessionStatus, Strategy, TaskSummary};
pub use worker::{run_worker, ExecutionOutcome, ProcessExecutor, WorkerExecutor};
