use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to open job database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("job {job_id} not found")]
    NotFound { job_id: String },
    #[error("job {job_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },
    #[error("job {job_id} in unexpected status: {status}")]
    InvalidStatus { job_id: String, status: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("job store path not configured")]
    MissingStore,
}

pub type JobStoreResult<T> = std::result::Result<T, JobStoreError>;
