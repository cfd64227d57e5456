//! Durable task store.
//!
//! Every task the scheduler dispatches gets a record here, one JSON file
//! per task id. Writes go through a temp file with an fsync and an atomic
//! rename, so a successful `create`/`update_status` means the record
//! survives a process restart. The scheduler treats store failures as
//! fatal to the session: losing task history silently is worse than
//! aborting.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::registry::{WorkerId, WorkerType};
use crate::{hlog_debug, hlog_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted record for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub worker_type: Option<WorkerType>,
    pub status: TaskStatus,
    pub assigned_worker: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// The task description and any dispatch context.
    pub input_payload: serde_json::Value,
    /// The worker's output, present once the task completes.
    pub output_payload: Option<serde_json::Value>,
}

/// Durable store of task records.
///
/// Internally synchronized; safe to share behind an `Arc` across sessions.
pub struct TaskStore {
    dir: PathBuf,
    index: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl TaskStore {
    /// Open (or create) a store rooted at the given directory.
    ///
    /// Existing records are loaded so a restarted process can inspect
    /// unterminated sessions.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the directory cannot be created or read.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {}", dir.display(), e)))?;

        let mut index = HashMap::new();
        let entries = fs::read_dir(dir)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {}", dir.display(), e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(Error::Io)
                .and_then(|s| serde_json::from_str::<TaskRecord>(&s).map_err(Error::Json))
            {
                Ok(record) => {
                    index.insert(record.id, record);
                }
                Err(e) => {
                    hlog_warn!("skipping unreadable task record {}: {}", path.display(), e);
                }
            }
        }

        hlog_debug!(
            "TaskStore::open dir={} records={}",
            dir.display(),
            index.len()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            index: Mutex::new(index),
        })
    }

    /// Directory this store writes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Insert a new record in `assigned` status.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if a record with the task's id already exists,
    /// or `StoreUnavailable` if the record cannot be written durably — the
    /// caller must abort the session rather than continue without history.
    pub fn create(&self, task: &Task, assigned_worker: WorkerId) -> Result<TaskId> {
        let record = TaskRecord {
            id: task.id,
            worker_type: task.worker_type.clone(),
            status: TaskStatus::Assigned,
            assigned_worker: Some(assigned_worker),
            created_at: task.created_at,
            completed_at: None,
            input_payload: serde_json::json!({ "description": task.description }),
            output_payload: None,
        };

        let mut index = self.index.lock().unwrap();
        if index.contains_key(&task.id) {
            return Err(Error::Validation(format!(
                "Task record {} already exists",
                task.id.short()
            )));
        }
        self.write_record(&record)?;
        index.insert(task.id, record);
        Ok(task.id)
    }

    /// Transition a task's status, optionally attaching a result payload.
    ///
    /// Repeating the record's current terminal status leaves it unchanged
    /// and succeeds (idempotent terminal updates).
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if absent, `InvalidTransition` if the state machine
    /// forbids the move, `StoreUnavailable` if the write fails.
    pub fn update_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut index = self.index.lock().unwrap();
        let record = index.get_mut(id).ok_or(Error::TaskNotFound(*id))?;

        if record.status.is_terminal()
            && std::mem::discriminant(&record.status) == std::mem::discriminant(&status)
        {
            return Ok(());
        }
        if !record.status.can_transition(&status) {
            return Err(Error::InvalidTransition {
                from: record.status.to_string(),
                to: status.to_string(),
            });
        }

        record.status = status;
        if record.status.is_terminal() {
            record.completed_at = Some(Utc::now());
        }
        if let Some(result) = result {
            record.output_payload = Some(result);
        }
        self.write_record(record)
    }

    /// Fetch a record by id.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if absent.
    pub fn get(&self, id: &TaskId) -> Result<TaskRecord> {
        self.index
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(Error::TaskNotFound(*id))
    }

    /// All records, sorted by creation time.
    pub fn list(&self) -> Result<Vec<TaskRecord>> {
        let mut records: Vec<TaskRecord> = self.index.lock().unwrap().values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    fn record_path(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Write a record durably: temp file, fsync, atomic rename.
    fn write_record(&self, record: &TaskRecord) -> Result<()> {
        let unavailable = |e: std::io::Error| Error::StoreUnavailable(e.to_string());

        let json = serde_json::to_string_pretty(record)?;
        let tmp = self.dir.join(format!("{}.json.tmp", record.id));
        {
            let mut file = fs::File::create(&tmp).map_err(unavailable)?;
            file.write_all(json.as_bytes()).map_err(unavailable)?;
            file.sync_all().map_err(unavailable)?;
        }
        fs::rename(&tmp, self.record_path(&record.id)).map_err(unavailable)?;
        Ok(())
    }
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("dir", &self.dir)
            .field("records", &self.index.lock().unwrap().len())
            .finish()
    }
}
