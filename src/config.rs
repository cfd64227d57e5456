use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::registry::{WorkerType, DEFAULT_CAPACITY};
use crate::{hlog_debug, Error, Result};

/// One statically configured worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub worker_type: WorkerType,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The static worker pool registered at startup.
    #[serde(default = "Config::default_workers")]
    pub workers: Vec<WorkerSpec>,
    /// Cap on dynamically spawned workers per type (swarm strategy).
    #[serde(default = "Config::default_max_spawn_per_type")]
    pub max_spawn_per_type: usize,
    /// Per-task execution timeout, in seconds.
    #[serde(default = "Config::default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Scheduling rounds a ready task may wait for worker capacity.
    #[serde(default = "Config::default_max_requeues")]
    pub max_requeues: usize,
    /// Directory for durable task records. Defaults to `~/.hive/tasks`.
    pub store_dir: Option<String>,
    /// Binary the planner shells out to for completions.
    pub completion_command: Option<String>,
    /// Binary workers run per task. Defaults to the completion command.
    pub worker_command: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            max_spawn_per_type: Self::default_max_spawn_per_type(),
            task_timeout_secs: Self::default_task_timeout_secs(),
            max_requeues: Self::default_max_requeues(),
            store_dir: None,
            completion_command: None,
            worker_command: None,
        }
    }
}

impl Config {
    fn default_workers() -> Vec<WorkerSpec> {
        vec![
            WorkerSpec {
                worker_type: WorkerType::Frontend,
                capacity: DEFAULT_CAPACITY,
            },
            WorkerSpec {
                worker_type: WorkerType::Backend,
                capacity: DEFAULT_CAPACITY,
            },
            WorkerSpec {
                worker_type: WorkerType::Tester,
                capacity: DEFAULT_CAPACITY,
            },
        ]
    }

    fn default_max_spawn_per_type() -> usize {
        3
    }

    fn default_task_timeout_secs() -> u64 {
        crate::orchestration::scheduler::DEFAULT_TASK_TIMEOUT_SECS
    }

    fn default_max_requeues() -> usize {
        crate::orchestration::scheduler::DEFAULT_MAX_REQUEUES
    }

    pub fn hive_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".hive"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::hive_dir()?.join("hive.toml"))
    }

    /// Directory for durable task records.
    pub fn store_dir(&self) -> Result<PathBuf> {
        match &self.store_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::hive_dir()?.join("tasks")),
        }
    }

    pub fn effective_completion_command(&self) -> &str {
        self.completion_command.as_deref().unwrap_or("claude")
    }

    pub fn effective_worker_command(&self) -> &str {
        self.worker_command
            .as_deref()
            .unwrap_or_else(|| self.effective_completion_command())
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        hlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            hlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        hlog_debug!(
            "Config loaded: workers={}, max_spawn_per_type={}, timeout={}s",
            config.workers.len(),
            config.max_spawn_per_type,
            config.task_timeout_secs
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let hive_dir = Self::hive_dir()?;
        hlog_debug!("Config::save hive_dir={}", hive_dir.display());
        if !hive_dir.exists() {
            fs::create_dir_all(&hive_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        hlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
