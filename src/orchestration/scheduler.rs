//! Session scheduler: strategies, dispatch protocol, failure propagation.
//!
//! The scheduler drives one request from plan to terminal graph. Every
//! dispatch follows the same protocol regardless of strategy: acquire a
//! worker, write the durable record, subscribe to the result topic,
//! publish the dispatch, then await the result under a timeout. Store
//! failures abort the session; execution failures and timeouts poison the
//! failed task's transitive dependents and the session finishes as a
//! partial failure.

use crate::channel::{result_topic, worker_topic, Message, MessageChannel, Subscription, TaskDispatch, TaskResult};
use crate::core::task::{FailureReason, Task, TaskId, TaskStatus};
use crate::core::TaskGraph;
use crate::error::{Error, Result};
use crate::orchestration::planner::Planner;
use crate::orchestration::worker::{run_worker, WorkerExecutor};
use crate::registry::{WorkerHandle, WorkerId, WorkerRegistry, WorkerType};
use crate::store::TaskStore;
use crate::{hlog, hlog_debug, hlog_warn};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default per-task execution timeout (5 minutes).
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;

/// Default number of capacity releases a ready task may miss before it
/// fails with `NoCapacity`.
pub const DEFAULT_MAX_REQUEUES: usize = 3;

/// How a session's tasks are ordered and parallelized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One task at a time, in deterministic topological order.
    Sequential,
    /// Dataflow execution: dispatch every ready task the pool can absorb.
    Parallel,
    /// Parallel, after growing the pool to the graph's peak demand.
    Swarm,
}

impl std::str::FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sequential" => Ok(Strategy::Sequential),
            "parallel" => Ok(Strategy::Parallel),
            "swarm" => Ok(Strategy::Swarm),
            other => Err(Error::Validation(format!("unknown strategy: {}", other))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::Parallel => write!(f, "parallel"),
            Strategy::Swarm => write!(f, "swarm"),
        }
    }
}

/// Unique identifier for one scheduler session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overall outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    /// Every task completed.
    Completed,
    /// At least one task failed, timed out, or was cancelled.
    PartialFailure,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::PartialFailure => write!(f, "partial_failure"),
        }
    }
}

/// Final state of one task, for session summaries.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub description: String,
    pub worker_type: Option<WorkerType>,
    pub status: TaskStatus,
}

/// The record of one finished orchestration run.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub request: String,
    pub strategy: Strategy,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskSummary>,
}

/// What one dispatch resolved to. Applied to the graph by the strategy loop.
#[derive(Debug)]
enum DispatchOutcome {
    Completed(serde_json::Value),
    Failed(String),
    TimedOut,
    Cancelled,
    /// Infrastructure failure (store write, closed result topic); the
    /// session must abort.
    Fatal(Error),
}

/// Drives sessions end to end: plan, dispatch, collect, persist.
pub struct Scheduler {
    registry: Arc<WorkerRegistry>,
    store: Arc<TaskStore>,
    channel: Arc<MessageChannel>,
    planner: Planner,
    executor: Arc<dyn WorkerExecutor>,
    task_timeout: Duration,
    max_requeues: usize,
    shutdown: CancellationToken,
    /// Workers whose runtime loop has been started.
    started_workers: Mutex<HashSet<WorkerId>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        store: Arc<TaskStore>,
        channel: Arc<MessageChannel>,
        planner: Planner,
        executor: Arc<dyn WorkerExecutor>,
    ) -> Self {
        Self {
            registry,
            store,
            channel,
            planner,
            executor,
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            max_requeues: DEFAULT_MAX_REQUEUES,
            shutdown: CancellationToken::new(),
            started_workers: Mutex::new(HashSet::new()),
        }
    }

    /// Set the per-task execution timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set how many capacity releases a ready task may miss before it fails.
    pub fn with_max_requeues(mut self, max_requeues: usize) -> Self {
        self.max_requeues = max_requeues;
        self
    }

    /// Token observed by every worker loop and in-flight dispatch.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request cancellation: in-flight tasks stop, untouched tasks fail.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Run one request to completion under the given strategy.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures (a store write that cannot be made
    /// durable) surface as errors. Task failures, timeouts, and
    /// cancellation are reflected in the session status instead.
    pub async fn run(&self, request: &str, strategy: Strategy) -> Result<Session> {
        let session_id = SessionId::new();
        let started_at = Utc::now();
        hlog!(
            "session {} started: strategy={} request={:?}",
            session_id.short(),
            strategy,
            request
        );

        let plan = self.planner.plan(request, &self.registry.snapshot()).await;
        let mut graph = plan.graph;
        if let Some(hint) = &plan.suggested_strategy {
            if hint.parse::<Strategy>().ok() != Some(strategy) {
                hlog_debug!(
                    "session {}: plan suggested strategy {:?}, caller chose {}",
                    session_id.short(),
                    hint,
                    strategy
                );
            }
        }
        hlog!(
            "session {}: {} tasks, {} dependencies{}",
            session_id.short(),
            graph.len(),
            graph.dependency_count(),
            if plan.fell_back { " (fallback plan)" } else { "" }
        );

        if strategy == Strategy::Swarm {
            self.grow_pool(&graph);
        }
        self.ensure_worker_loops();

        match strategy {
            Strategy::Sequential => self.run_sequential(&mut graph).await?,
            Strategy::Parallel | Strategy::Swarm => self.run_parallel(&mut graph).await?,
        }

        let status = if graph
            .tasks()
            .iter()
            .all(|t| t.status == TaskStatus::Completed)
        {
            SessionStatus::Completed
        } else {
            SessionStatus::PartialFailure
        };
        hlog!("session {} finished: {}", session_id.short(), status);

        Ok(Session {
            id: session_id,
            request: request.to_string(),
            strategy,
            status,
            started_at,
            finished_at: Utc::now(),
            tasks: graph
                .tasks()
                .iter()
                .map(|t| TaskSummary {
                    id: t.id,
                    description: t.description.clone(),
                    worker_type: t.worker_type.clone(),
                    status: t.status.clone(),
                })
                .collect(),
        })
    }

    /// Start a runtime loop for every registered worker that lacks one.
    ///
    /// Loops run until the shutdown token fires; spawned workers are torn
    /// down at shutdown, not when their session ends.
    fn ensure_worker_loops(&self) {
        let mut started = self.started_workers.lock().unwrap();
        for (worker_id, _) in self.registry.worker_ids() {
            if started.insert(worker_id) {
                // Subscribe before spawning: the channel has no replay, so
                // a dispatch published before the loop's first poll would
                // otherwise be lost.
                let dispatches = self.channel.subscribe(&worker_topic(&worker_id));
                tokio::spawn(run_worker(
                    Arc::clone(&self.channel),
                    worker_id,
                    dispatches,
                    Arc::clone(&self.executor),
                    self.shutdown.child_token(),
                ));
            }
        }
    }

    /// Grow the pool toward the graph's peak per-type demand.
    ///
    /// Spawning stops silently at the per-type cap; the parallel loop
    /// handles whatever capacity actually exists.
    fn grow_pool(&self, graph: &TaskGraph) {
        for (worker_type, needed) in graph.worker_demand() {
            let mut have = self.registry.count_of_type(&worker_type);
            while have < needed {
                match self.registry.spawn(worker_type.clone()) {
                    Ok(handle) => {
                        hlog!(
                            "spawned {} worker {} ({}/{} needed)",
                            worker_type,
                            handle.worker_id.short(),
                            have + 1,
                            needed
                        );
                        have += 1;
                    }
                    Err(e) => {
                        hlog_warn!("pool growth for {} stopped: {}", worker_type, e);
                        break;
                    }
                }
            }
        }
    }

    /// One task at a time, in deterministic topological order.
    async fn run_sequential(&self, graph: &mut TaskGraph) -> Result<()> {
        let order = graph.topological_order()?;
        for id in order {
            if self.shutdown.is_cancelled() {
                self.cancel_pending(graph);
                break;
            }
            // Poisoned tasks are already terminal; skip them.
            let task = match graph.get(&id) {
                Some(t) if t.status == TaskStatus::Pending => t.clone(),
                _ => continue,
            };

            let worker_type = task.worker_type.clone().unwrap_or(WorkerType::Backend);
            let handle = match self.registry.acquire(&worker_type) {
                Some(handle) => handle,
                None => {
                    if let Some(t) = graph.get_mut(&id) {
                        t.fail(FailureReason::NoCapacity);
                    }
                    self.poison_dependents(graph, &id);
                    continue;
                }
            };

            if let Some(t) = graph.get_mut(&id) {
                t.assign(handle.worker_type.clone());
            }
            let (_, outcome) = dispatch_task(
                Arc::clone(&self.store),
                Arc::clone(&self.channel),
                Arc::clone(&self.registry),
                self.task_timeout,
                self.shutdown.clone(),
                task,
                handle,
            )
            .await;
            self.apply_outcome(graph, id, outcome)?;
        }
        Ok(())
    }

    /// Dataflow loop: dispatch every ready task the pool can absorb,
    /// collect outcomes as they land, repeat until the graph is terminal.
    ///
    /// A ready task whose worker type is saturated stays queued; it is
    /// retried whenever a worker is released and charged one requeue for
    /// each release that still leaves it without capacity. Past
    /// `max_requeues` misses it fails with `NoCapacity`.
    async fn run_parallel(&self, graph: &mut TaskGraph) -> Result<()> {
        let mut inflight: JoinSet<(TaskId, DispatchOutcome)> = JoinSet::new();
        let mut requeues: HashMap<TaskId, usize> = HashMap::new();
        let mut abort: Option<Error> = None;
        // Set after a release woke the loop: tasks still starved in the
        // next round missed that release.
        let mut charge_waits = false;

        loop {
            if self.shutdown.is_cancelled() {
                self.cancel_pending(graph);
            } else if abort.is_none() {
                for id in graph.ready_tasks() {
                    let task = match graph.get(&id) {
                        Some(t) => t.clone(),
                        None => continue,
                    };
                    let worker_type = task.worker_type.clone().unwrap_or(WorkerType::Backend);
                    match self.registry.acquire(&worker_type) {
                        Some(handle) => {
                            if let Some(t) = graph.get_mut(&id) {
                                t.assign(handle.worker_type.clone());
                            }
                            inflight.spawn(dispatch_task(
                                Arc::clone(&self.store),
                                Arc::clone(&self.channel),
                                Arc::clone(&self.registry),
                                self.task_timeout,
                                self.shutdown.clone(),
                                task,
                                handle,
                            ));
                        }
                        None if self.registry.count_of_type(&worker_type) == 0 => {
                            // No worker of this type exists, so no release
                            // can ever serve the task.
                            hlog_warn!(
                                "task {} needs a {} worker but none exist",
                                id.short(),
                                worker_type
                            );
                            if let Some(t) = graph.get_mut(&id) {
                                t.fail(FailureReason::NoCapacity);
                            }
                            self.poison_dependents(graph, &id);
                        }
                        None => {
                            if charge_waits {
                                let waited = requeues.entry(id).or_insert(0);
                                *waited += 1;
                                if *waited > self.max_requeues {
                                    hlog_warn!(
                                        "task {} exhausted requeue budget waiting for a {} worker",
                                        id.short(),
                                        worker_type
                                    );
                                    if let Some(t) = graph.get_mut(&id) {
                                        t.fail(FailureReason::NoCapacity);
                                    }
                                    self.poison_dependents(graph, &id);
                                }
                            }
                        }
                    }
                }
                charge_waits = false;
            }

            if inflight.is_empty() {
                if graph.all_terminal() || abort.is_some() || self.shutdown.is_cancelled() {
                    break;
                }
                // Queued tasks with nothing in flight: capacity is held
                // elsewhere, wait for a release to retry.
                tokio::select! {
                    _ = self.registry.released() => charge_waits = true,
                    _ = self.shutdown.cancelled() => {}
                }
                continue;
            }

            tokio::select! {
                joined = inflight.join_next() => {
                    match joined {
                        Some(Ok((id, outcome))) => {
                            if let Err(e) = self.apply_outcome(graph, id, outcome) {
                                abort = Some(e);
                            }
                        }
                        Some(Err(e)) => {
                            abort =
                                Some(Error::Validation(format!("dispatch task panicked: {}", e)));
                        }
                        None => {}
                    }
                    // Every finished dispatch released its worker.
                    charge_waits = true;
                }
                _ = self.registry.released() => charge_waits = true,
            }
        }

        match abort {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Apply one dispatch outcome to the graph.
    ///
    /// # Errors
    ///
    /// Propagates infrastructure failures (store, channel) so the strategy
    /// loop aborts the session.
    fn apply_outcome(
        &self,
        graph: &mut TaskGraph,
        id: TaskId,
        outcome: DispatchOutcome,
    ) -> Result<()> {
        match outcome {
            DispatchOutcome::Completed(result) => {
                if let Some(t) = graph.get_mut(&id) {
                    t.complete(result);
                }
            }
            DispatchOutcome::Failed(message) => {
                hlog_warn!("task {} failed: {}", id.short(), message);
                if let Some(t) = graph.get_mut(&id) {
                    t.fail(FailureReason::Execution { message });
                }
                self.poison_dependents(graph, &id);
            }
            DispatchOutcome::TimedOut => {
                hlog_warn!("task {} timed out after {:?}", id.short(), self.task_timeout);
                if let Some(t) = graph.get_mut(&id) {
                    t.time_out();
                }
                self.poison_dependents(graph, &id);
            }
            DispatchOutcome::Cancelled => {
                if let Some(t) = graph.get_mut(&id) {
                    t.fail(FailureReason::Cancelled);
                }
            }
            DispatchOutcome::Fatal(e) => return Err(e),
        }
        Ok(())
    }

    /// Fail every non-terminal transitive dependent of a failed task.
    ///
    /// Poisoned tasks were never dispatched, so only the graph is updated;
    /// the store holds no record for them.
    fn poison_dependents(&self, graph: &mut TaskGraph, id: &TaskId) {
        for dependent in graph.transitive_dependents(id) {
            if let Some(t) = graph.get_mut(&dependent) {
                if !t.is_terminal() {
                    hlog_debug!(
                        "task {} poisoned by upstream {}",
                        dependent.short(),
                        id.short()
                    );
                    t.fail(FailureReason::UpstreamFailure);
                }
            }
        }
    }

    /// Fail every still-pending task after a cancellation.
    fn cancel_pending(&self, graph: &mut TaskGraph) {
        for id in graph.task_ids() {
            if let Some(t) = graph.get_mut(&id) {
                if t.status == TaskStatus::Pending {
                    t.fail(FailureReason::Cancelled);
                }
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("task_timeout", &self.task_timeout)
            .field("max_requeues", &self.max_requeues)
            .finish()
    }
}

/// Run the dispatch protocol for one task on an already-acquired worker.
///
/// Owns the whole exchange: durable record, result subscription, publish,
/// await under timeout, terminal store update, worker release. Free
/// function with owned handles so the parallel loop can spawn it.
async fn dispatch_task(
    store: Arc<TaskStore>,
    channel: Arc<MessageChannel>,
    registry: Arc<WorkerRegistry>,
    timeout: Duration,
    shutdown: CancellationToken,
    task: Task,
    handle: WorkerHandle,
) -> (TaskId, DispatchOutcome) {
    let id = task.id;

    if let Err(e) = store.create(&task, handle.worker_id) {
        registry.release(&handle);
        return (id, DispatchOutcome::Fatal(e));
    }

    // Subscribe before publishing: the channel never replays history.
    let mut results = channel.subscribe(&result_topic(&id));

    if let Err(e) = store.update_status(&id, TaskStatus::Running, None) {
        registry.release(&handle);
        return (id, DispatchOutcome::Fatal(e));
    }

    channel.publish(
        &worker_topic(&handle.worker_id),
        Message::Dispatch(TaskDispatch {
            task_id: id,
            description: task.description.clone(),
            context: serde_json::Value::Null,
        }),
    );

    let outcome = tokio::select! {
        _ = shutdown.cancelled() => DispatchOutcome::Cancelled,
        result = tokio::time::timeout(timeout, await_result(&mut results, id)) => {
            match result {
                Ok(Some(r)) if r.success => {
                    DispatchOutcome::Completed(serde_json::json!({ "output": r.output }))
                }
                Ok(Some(r)) => DispatchOutcome::Failed(
                    r.error.unwrap_or_else(|| "worker reported failure".to_string()),
                ),
                // A closed result topic means the channel itself is gone;
                // no result can ever arrive, so abort the session.
                Ok(None) => DispatchOutcome::Fatal(Error::ChannelClosed(result_topic(&id))),
                Err(_) => DispatchOutcome::TimedOut,
            }
        }
    };

    let status = match &outcome {
        DispatchOutcome::Completed(result) => {
            store.update_status(&id, TaskStatus::Completed, Some(result.clone()))
        }
        DispatchOutcome::Failed(message) => store.update_status(
            &id,
            TaskStatus::Failed {
                reason: FailureReason::Execution {
                    message: message.clone(),
                },
            },
            None,
        ),
        DispatchOutcome::TimedOut => store.update_status(&id, TaskStatus::TimedOut, None),
        DispatchOutcome::Cancelled => store.update_status(
            &id,
            TaskStatus::Failed {
                reason: FailureReason::Cancelled,
            },
            None,
        ),
        DispatchOutcome::Fatal(_) => Ok(()),
    };

    registry.release(&handle);

    match status {
        Ok(()) => (id, outcome),
        Err(e) => (id, DispatchOutcome::Fatal(e)),
    }
}

/// Await the result message for one task, ignoring unrelated traffic.
async fn await_result(results: &mut Subscription, id: TaskId) -> Option<TaskResult> {
    while let Some(message) = results.recv().await {
        if let Message::Result(result) = message {
            if result.task_id == id {
                return Some(result);
            }
        }
    }
    None
}
