//! Worker runtime: receive dispatches, execute, report results.
//!
//! A worker is a loop around a channel subscription. The scheduler owns
//! all bookkeeping (capacity, persistence, state transitions); the worker
//! only executes and reports. Execution is behind the `WorkerExecutor`
//! trait so tests substitute deterministic executors for the external
//! process.

use crate::channel::{result_topic, Message, MessageChannel, Subscription, TaskDispatch, TaskResult};
use crate::registry::WorkerId;
use crate::{hlog, hlog_debug};
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The outcome of executing one dispatched task.
///
/// Execution is infallible at the type level; failures are carried in the
/// outcome so the worker loop always has something to report.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// A successful outcome with the given output.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// A failed outcome with the given error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Executes one dispatched task.
///
/// Object safe so the runtime can hold `Arc<dyn WorkerExecutor>` and tests
/// can swap in stubs.
pub trait WorkerExecutor: Send + Sync {
    fn execute<'a>(&'a self, dispatch: &'a TaskDispatch) -> BoxFuture<'a, ExecutionOutcome>;
}

/// Executor that shells out to an external binary per task.
///
/// The binary receives `-p <description>` and its stdout becomes the task
/// output. A spawn failure or non-zero exit becomes a failed outcome, not
/// an error: the scheduler decides what failure means.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    binary: PathBuf,
}

impl ProcessExecutor {
    /// Create an executor, locating the binary by name with `which`.
    pub fn new(command: &str) -> crate::error::Result<Self> {
        let binary = which::which(command).map_err(|_| {
            crate::error::Error::CompletionUnavailable(format!("binary not found: {}", command))
        })?;
        Ok(Self { binary })
    }

    /// Create an executor with an explicit binary path.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }
}

impl WorkerExecutor for ProcessExecutor {
    fn execute<'a>(&'a self, dispatch: &'a TaskDispatch) -> BoxFuture<'a, ExecutionOutcome> {
        Box::pin(async move {
            let result = tokio::process::Command::new(&self.binary)
                .arg("-p")
                .arg(&dispatch.description)
                .output()
                .await;

            match result {
                Ok(output) if output.status.success() => {
                    ExecutionOutcome::success(String::from_utf8_lossy(&output.stdout).trim())
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    ExecutionOutcome::failure(format!(
                        "exit code {}: {}",
                        output.status.code().unwrap_or(-1),
                        stderr.trim()
                    ))
                }
                Err(e) => ExecutionOutcome::failure(format!("failed to spawn worker: {}", e)),
            }
        })
    }
}

/// Run one worker's receive-execute-report loop until shutdown.
///
/// The caller creates the dispatch-topic subscription before spawning the
/// loop; the channel has no replay, so a dispatch published between spawn
/// and first poll would otherwise be lost. Each dispatch is executed with
/// the given executor and its result published on the task's result topic.
/// The loop ends when the token is cancelled or the topic closes.
pub async fn run_worker(
    channel: Arc<MessageChannel>,
    worker_id: WorkerId,
    mut subscription: Subscription,
    executor: Arc<dyn WorkerExecutor>,
    shutdown: CancellationToken,
) {
    hlog_debug!("worker {} listening", worker_id.short());

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = subscription.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let dispatch = match message {
            Message::Dispatch(dispatch) => dispatch,
            // Results never appear on a dispatch topic; ignore defensively.
            Message::Result(_) => continue,
        };

        hlog!(
            "worker {} executing task {}",
            worker_id.short(),
            dispatch.task_id.short()
        );
        let outcome = executor.execute(&dispatch).await;

        channel.publish(
            &result_topic(&dispatch.task_id),
            Message::Result(TaskResult {
                task_id: dispatch.task_id,
                success: outcome.success,
                output: outcome.output,
                error: outcome.error,
            }),
        );
    }

    hlog_debug!("worker {} stopped", worker_id.short());
}
