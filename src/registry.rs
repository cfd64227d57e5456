//! Worker registry for pool management.
//!
//! The `WorkerRegistry` tracks the fixed pool of workers defined at startup
//! plus any dynamically spawned instances, enforcing per-worker capacity and
//! the per-type spawn cap. Acquire, release, and spawn are linearizable: all
//! bookkeeping happens under a single mutex and no method suspends while
//! holding it.

use crate::error::{Error, Result};
use crate::hlog_warn;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// Default maximum concurrent tasks per worker.
pub const DEFAULT_CAPACITY: usize = 1;

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    /// Create a new unique worker identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role tag for a worker.
///
/// The base roles mirror the static pool definition; anything else is a
/// dynamically configured variant carried as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkerType {
    Frontend,
    Backend,
    Tester,
    Custom(String),
}

impl WorkerType {
    pub fn as_str(&self) -> &str {
        match self {
            WorkerType::Frontend => "frontend",
            WorkerType::Backend => "backend",
            WorkerType::Tester => "tester",
            WorkerType::Custom(name) => name,
        }
    }
}

impl From<String> for WorkerType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "frontend" => WorkerType::Frontend,
            "backend" => WorkerType::Backend,
            "tester" => WorkerType::Tester,
            _ => WorkerType::Custom(s),
        }
    }
}

impl From<WorkerType> for String {
    fn from(t: WorkerType) -> Self {
        t.as_str().to_string()
    }
}

impl std::str::FromStr for WorkerType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl std::fmt::Display for WorkerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A claim on one unit of a worker's capacity.
///
/// Returned by `acquire` (and `spawn`) and passed back to `release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    /// The worker this handle refers to.
    pub worker_id: WorkerId,
    /// The worker's role tag.
    pub worker_type: WorkerType,
}

/// Point-in-time view of one worker, fed to the planner prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_type: WorkerType,
    pub capacity: usize,
    pub current_load: usize,
}

/// Internal worker record.
#[derive(Debug)]
struct Worker {
    id: WorkerId,
    worker_type: WorkerType,
    capacity: usize,
    current_load: usize,
    spawned: bool,
}

/// Registry of the worker pool.
///
/// Workers are untrusted remote executors; every capacity decision is made
/// here, before dispatch, never by the worker itself. Spawned workers are
/// torn down only at process shutdown.
pub struct WorkerRegistry {
    inner: Mutex<Vec<Worker>>,
    max_spawn_per_type: usize,
    releases: Notify,
}

impl WorkerRegistry {
    /// Create an empty registry with the given per-type spawn cap.
    pub fn new(max_spawn_per_type: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            max_spawn_per_type,
            releases: Notify::new(),
        }
    }

    /// Add a static worker to the pool.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateWorker` if a worker with the generated id already
    /// exists (id collision).
    pub fn register(&self, worker_type: WorkerType, capacity: usize) -> Result<WorkerId> {
        let id = WorkerId::new();
        let mut workers = self.inner.lock().unwrap();
        if workers.iter().any(|w| w.id == id) {
            return Err(Error::DuplicateWorker { id });
        }
        workers.push(Worker {
            id,
            worker_type,
            capacity,
            current_load: 0,
            spawned: false,
        });
        Ok(id)
    }

    /// Acquire a worker of the requested type.
    ///
    /// Returns the first worker of that type with spare capacity, with its
    /// load incremented under the lock, or `None` if every worker of the
    /// type is saturated.
    pub fn acquire(&self, worker_type: &WorkerType) -> Option<WorkerHandle> {
        let mut workers = self.inner.lock().unwrap();
        let worker = workers
            .iter_mut()
            .find(|w| &w.worker_type == worker_type && w.current_load < w.capacity)?;
        worker.current_load += 1;
        Some(WorkerHandle {
            worker_id: worker.id,
            worker_type: worker.worker_type.clone(),
        })
    }

    /// Release a previously acquired worker.
    ///
    /// A release for an unknown worker or one that is already idle is
    /// logged and otherwise ignored.
    pub fn release(&self, handle: &WorkerHandle) {
        let mut workers = self.inner.lock().unwrap();
        match workers.iter_mut().find(|w| w.id == handle.worker_id) {
            Some(worker) if worker.current_load > 0 => {
                worker.current_load -= 1;
                drop(workers);
                self.releases.notify_one();
            }
            Some(_) => {
                hlog_warn!("release of already idle worker {}", handle.worker_id.short());
            }
            None => {
                hlog_warn!("release of unknown worker {}", handle.worker_id.short());
            }
        }
    }

    /// Wait until a unit of capacity is returned to the pool.
    ///
    /// A release that lands before this call stores a permit, so the wait
    /// resolves immediately instead of missing the wakeup. Callers retry
    /// `acquire` after waking; another waiter may have taken the capacity.
    pub async fn released(&self) {
        self.releases.notified().await;
    }

    /// Spawn a new dynamic worker of the given type.
    ///
    /// The new worker starts idle; callers still go through `acquire` to
    /// claim its capacity.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` once `max_spawn_per_type` workers of the
    /// type have been spawned.
    pub fn spawn(&self, worker_type: WorkerType) -> Result<WorkerHandle> {
        let mut workers = self.inner.lock().unwrap();
        let spawned = workers
            .iter()
            .filter(|w| w.worker_type == worker_type && w.spawned)
            .count();
        if spawned >= self.max_spawn_per_type {
            return Err(Error::CapacityExceeded {
                worker_type,
                max: self.max_spawn_per_type,
            });
        }
        let id = WorkerId::new();
        workers.push(Worker {
            id,
            worker_type: worker_type.clone(),
            capacity: DEFAULT_CAPACITY,
            current_load: 0,
            spawned: true,
        });
        Ok(WorkerHandle {
            worker_id: id,
            worker_type,
        })
    }

    /// Check if the registry knows a worker type at all.
    pub fn has_type(&self, worker_type: &WorkerType) -> bool {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .any(|w| &w.worker_type == worker_type)
    }

    /// Total number of workers (static + spawned).
    pub fn worker_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Number of workers of a given type.
    pub fn count_of_type(&self, worker_type: &WorkerType) -> usize {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|w| &w.worker_type == worker_type)
            .count()
    }

    /// Number of dynamically spawned workers of a given type.
    pub fn spawned_count(&self, worker_type: &WorkerType) -> usize {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|w| &w.worker_type == worker_type && w.spawned)
            .count()
    }

    /// The configured per-type spawn cap.
    pub fn max_spawn_per_type(&self) -> usize {
        self.max_spawn_per_type
    }

    /// Snapshot of every worker for planner prompts and status output.
    pub fn snapshot(&self) -> Vec<WorkerInfo> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|w| WorkerInfo {
                worker_type: w.worker_type.clone(),
                capacity: w.capacity,
                current_load: w.current_load,
            })
            .collect()
    }

    /// Ids and types of every worker, used to start runtime loops.
    pub fn worker_ids(&self) -> Vec<(WorkerId, WorkerType)> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|w| (w.id, w.worker_type.clone()))
            .collect()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.worker_count())
            .field("max_spawn_per_type", &self.max_spawn_per_type)
            .finish()
    }
}
