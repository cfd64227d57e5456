//! Task data model for the orchestration graph.
//!
//! Tasks are the atomic units of work handed to workers. Each task tracks
//! its description, assigned worker type, lifecycle status, result payload,
//! and timestamps.

use crate::registry::WorkerType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Why a task reached the `Failed` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureReason {
    /// The worker executed the task and reported failure.
    Execution {
        /// Error text reported by the worker.
        message: String,
    },
    /// A dependency of this task failed or timed out; the task was never dispatched.
    UpstreamFailure,
    /// No worker capacity became available within the requeue budget.
    NoCapacity,
    /// The session was cancelled before the task could run to completion.
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Execution { message } => write!(f, "execution: {}", message),
            FailureReason::UpstreamFailure => write!(f, "upstream_failure"),
            FailureReason::NoCapacity => write!(f, "no_capacity"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Task status in its lifecycle.
///
/// Tasks transition monotonically: `pending → assigned → running` and then
/// one of the terminal states. The only sanctioned shortcut is
/// `assigned → terminal` for synchronous execution; pending tasks may fail
/// directly when they are poisoned without ever being dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created but not yet handed to a worker.
    Pending,
    /// Task bound to a worker, durable record written.
    Assigned,
    /// Task is currently being executed by a worker.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed with a reason.
    Failed {
        /// Why the task failed.
        reason: FailureReason,
    },
    /// Task exceeded its execution timeout.
    TimedOut,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// Check if this status is terminal (completed, failed, or timed out).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed { .. } | TaskStatus::TimedOut
        )
    }

    /// Check whether transitioning to `next` is legal.
    ///
    /// Repeating the current terminal state is allowed so that terminal
    /// updates are idempotent. A pending task may fail directly only for
    /// reasons that do not involve execution (it was never dispatched).
    pub fn can_transition(&self, next: &TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Assigned) => true,
            (Pending, Failed { reason }) => !matches!(
                reason,
                FailureReason::Execution { .. }
            ),
            (Assigned, Running) => true,
            // Fast path for synchronous execution.
            (Assigned, next) if next.is_terminal() => true,
            (Running, next) if next.is_terminal() => true,
            // Idempotent terminal repeat: same variant, reason ignored.
            (a, b) if a.is_terminal() && std::mem::discriminant(a) == std::mem::discriminant(b) => {
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { reason } => write!(f, "failed: {}", reason),
            TaskStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// A single task in the orchestration graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Description of what the task should accomplish. Immutable.
    pub description: String,
    /// Worker type this task is assigned to. Immutable once set.
    pub worker_type: Option<WorkerType>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Result payload, present only once the task completes successfully.
    pub result: Option<serde_json::Value>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with the given description.
    pub fn new(description: &str) -> Self {
        Self {
            id: TaskId::new(),
            description: description.to_string(),
            worker_type: None,
            status: TaskStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Create a task pre-assigned to a worker type (planner output).
    pub fn for_worker(description: &str, worker_type: WorkerType) -> Self {
        let mut task = Self::new(description);
        task.worker_type = Some(worker_type);
        task
    }

    /// Bind the task to a worker type and mark it assigned.
    ///
    /// The worker type is immutable once set; a second call keeps the
    /// original binding.
    pub fn assign(&mut self, worker_type: WorkerType) {
        if self.worker_type.is_none() {
            self.worker_type = Some(worker_type);
        }
        self.status = TaskStatus::Assigned;
    }

    /// Start the task execution.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the task as successfully completed with a result payload.
    pub fn complete(&mut self, result: serde_json::Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as failed with a reason.
    pub fn fail(&mut self, reason: FailureReason) {
        self.status = TaskStatus::Failed { reason };
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as timed out.
    pub fn time_out(&mut self) {
        self.status = TaskStatus::TimedOut;
        self.completed_at = Some(Utc::now());
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
