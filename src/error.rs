use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate worker: {id}")]
    DuplicateWorker { id: crate::registry::WorkerId },

    #[error("Spawn capacity exceeded for worker type {worker_type} (max: {max})")]
    CapacityExceeded {
        worker_type: crate::registry::WorkerType,
        max: usize,
    },

    #[error("Task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task not found: {0}")]
    TaskNotFound(crate::core::task::TaskId),

    #[error("Completion service unavailable: {0}")]
    CompletionUnavailable(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
