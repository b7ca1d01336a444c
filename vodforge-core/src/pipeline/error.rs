use std::path::PathBuf;

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::encoder::EncoderError;
use crate::job::JobStoreError;
use crate::store::ObjectStoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {message}")]
    Validation { message: String },
    #[error("Download failed: {source}")]
    Download {
        #[source]
        source: ObjectStoreError,
    },
    #[error("upload failed for {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: ObjectStoreError,
    },
    #[error("object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("callback delivery failed: {message}")]
    Callback { message: String },
    #[error("job store error: {0}")]
    JobStore(#[from] JobStoreError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
