//! Test fixtures for integration tests.
//!
//! Provides a wired-up scheduler harness with a stubbed completion service
//! and a scripted worker executor.

use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use hive::channel::{MessageChannel, TaskDispatch};
use hive::orchestration::completion::CompletionService;
use hive::orchestration::worker::{ExecutionOutcome, WorkerExecutor};
use hive::orchestration::{Planner, Scheduler};
use hive::registry::{WorkerRegistry, WorkerType};
use hive::store::TaskStore;
use hive::{Error, Result};

/// Per-type spawn cap used by every harness.
pub const MAX_SPAWN: usize = 3;

/// Completion stub: a canned plan response, or unavailable.
pub struct StubCompletion {
    response: Option<String>,
}

impl StubCompletion {
    pub fn responding(text: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Some(text.to_string()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self { response: None })
    }
}

impl CompletionService for StubCompletion {
    fn complete<'a>(&'a self, _system: &'a str, _prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        let response = self.response.clone();
        Box::pin(async move {
            response.ok_or_else(|| Error::CompletionUnavailable("stubbed offline".to_string()))
        })
    }
}

/// Worker executor with scripted failures, a fixed delay, and probes for
/// execution order and peak concurrency.
pub struct ScriptedExecutor {
    fail_containing: Option<String>,
    delay: Duration,
    executed: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn instant() -> Arc<Self> {
        Self::build(None, Duration::ZERO)
    }

    /// Fail any task whose description contains the needle.
    pub fn failing_on(needle: &str) -> Arc<Self> {
        Self::build(Some(needle.to_string()), Duration::ZERO)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(None, delay)
    }

    fn build(fail_containing: Option<String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fail_containing,
            delay,
            executed: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Task descriptions in the order execution started.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Largest number of tasks ever executing at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl WorkerExecutor for ScriptedExecutor {
    fn execute<'a>(&'a self, dispatch: &'a TaskDispatch) -> BoxFuture<'a, ExecutionOutcome> {
        Box::pin(async move {
            self.executed
                .lock()
                .unwrap()
                .push(dispatch.description.clone());
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            match &self.fail_containing {
                Some(needle) if dispatch.description.contains(needle) => {
                    ExecutionOutcome::failure(format!("refused: {}", dispatch.description))
                }
                _ => ExecutionOutcome::success(format!("done: {}", dispatch.description)),
            }
        })
    }
}

/// Wrap a plan's task array in the response shape the planner expects.
pub fn fenced_plan(tasks_json: &str) -> String {
    format!("```json\n{{\"tasks\": {}}}\n```", tasks_json)
}

/// A fully wired scheduler over temp storage and stubbed edges.
pub struct Harness {
    _dir: TempDir,
    pub store_path: PathBuf,
    pub registry: Arc<WorkerRegistry>,
    pub store: Arc<TaskStore>,
    pub executor: Arc<ScriptedExecutor>,
    pub scheduler: Scheduler,
}

impl Harness {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        executor: Arc<ScriptedExecutor>,
        workers: &[(WorkerType, usize)],
    ) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store_path = dir.path().to_path_buf();

        let registry = Arc::new(WorkerRegistry::new(MAX_SPAWN));
        for (worker_type, capacity) in workers {
            registry
                .register(worker_type.clone(), *capacity)
                .expect("Failed to register worker");
        }

        let store = Arc::new(TaskStore::open(dir.path()).expect("Failed to open store"));
        let channel = Arc::new(MessageChannel::new());
        let scheduler = Scheduler::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            channel,
            Planner::new(completion),
            executor.clone() as Arc<dyn WorkerExecutor>,
        );

        Self {
            _dir: dir,
            store_path,
            registry,
            store,
            executor,
            scheduler,
        }
    }

    /// One worker each of frontend, backend, and tester, capacity 1.
    pub fn standard(plan_response: &str, executor: Arc<ScriptedExecutor>) -> Self {
        Self::new(
            StubCompletion::responding(plan_response),
            executor,
            &[
                (WorkerType::Frontend, 1),
                (WorkerType::Backend, 1),
                (WorkerType::Tester, 1),
            ],
        )
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.scheduler = self.scheduler.with_task_timeout(timeout);
        self
    }

    pub fn with_max_requeues(mut self, max_requeues: usize) -> Self {
        self.scheduler = self.scheduler.with_max_requeues(max_requeues);
        self
    }

    /// Total load currently held across the pool.
    pub fn total_load(&self) -> usize {
        self.registry.snapshot().iter().map(|w| w.current_load).sum()
    }
}
