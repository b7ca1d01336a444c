use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to open queue database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on queue database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("failed to serialize queue payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("queue entry {id} not found")]
    EntryNotFound { id: i64 },
    #[error("queue entry {id} in unexpected state: {state}")]
    InvalidState { id: i64, state: String },
    #[error("queue path not configured")]
    MissingStore,
}

pub type QueueResult<T> = Result<T, QueueError>;
