use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::encoder::{Resolution, VideoInfo};

pub const CHECKPOINT_FILE: &str = "job_state.json";

/// Strictly ordered pipeline stages, with `failed` as a terminal sibling
/// reachable from any non-completed stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialized,
    Downloaded,
    Analyzed,
    ThumbnailsGenerated,
    Transcoded,
    Uploaded,
    Completed,
    Failed,
}

impl Stage {
    /// Position in the strict order; `failed` has no position.
    pub fn index(&self) -> Option<usize> {
        match self {
            Stage::Initialized => Some(0),
            Stage::Downloaded => Some(1),
            Stage::Analyzed => Some(2),
            Stage::ThumbnailsGenerated => Some(3),
            Stage::Transcoded => Some(4),
            Stage::Uploaded => Some(5),
            Stage::Completed => Some(6),
            Stage::Failed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initialized => "initialized",
            Stage::Downloaded => "downloaded",
            Stage::Analyzed => "analyzed",
            Stage::ThumbnailsGenerated => "thumbnails_generated",
            Stage::Transcoded => "transcoded",
            Stage::Uploaded => "uploaded",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("checkpoint serialization error at {path}: {source}")]
    Serde {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedFile {
    pub name: String,
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobCheckpoint {
    pub job_id: String,
    pub stage: Stage,
    #[serde(default)]
    pub completed_resolutions: Vec<Resolution>,
    #[serde(default)]
    pub uploaded_files: Vec<UploadedFile>,
    #[serde(default)]
    pub video_info: Option<VideoInfo>,
    #[serde(default)]
    pub valid_resolutions: Vec<Resolution>,
    #[serde(default)]
    pub thumbnail_paths: Vec<PathBuf>,
    #[serde(default)]
    pub downloaded_file: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobCheckpoint {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            stage: Stage::Initialized,
            completed_resolutions: Vec::new(),
            uploaded_files: Vec::new(),
            video_info: None,
            valid_resolutions: Vec::new(),
            thumbnail_paths: Vec::new(),
            downloaded_file: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// True only when the recorded stage is strictly past `stage`.
    pub fn is_stage_completed(&self, stage: Stage) -> bool {
        match (self.stage.index(), stage.index()) {
            (Some(current), Some(target)) => current > target,
            _ => false,
        }
    }

    pub fn mark_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.stage = Stage::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Idempotent by key; a resumed run re-offering the same upload is a
    /// no-op.
    pub fn add_uploaded_file(&mut self, file: UploadedFile) {
        if !self.uploaded_files.iter().any(|f| f.key == file.key) {
            self.uploaded_files.push(file);
        }
    }

    pub fn has_uploaded(&self, key: &str) -> bool {
        self.uploaded_files.iter().any(|f| f.key == key)
    }

    pub fn add_completed_resolution(&mut self, resolution: Resolution) {
        if !self.completed_resolutions.contains(&resolution) {
            self.completed_resolutions.push(resolution);
        }
    }

    pub fn is_resolution_completed(&self, resolution: Resolution) -> bool {
        self.completed_resolutions.contains(&resolution)
    }

    pub fn total_uploaded_size(&self) -> u64 {
        self.uploaded_files.iter().map(|f| f.size).sum()
    }
}

/// Read-whole/write-whole access to a job's on-disk state. Writes go to a
/// sibling temp file, fsync, then rename, so a crash never leaves a torn
/// checkpoint behind.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(job_dir: impl AsRef<Path>) -> Self {
        Self {
            path: job_dir.as_ref().join(CHECKPOINT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> CheckpointResult<Option<JobCheckpoint>> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                let checkpoint =
                    serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Serde {
                        path: self.path.clone(),
                        source,
                    })?;
                Ok(Some(checkpoint))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CheckpointError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub async fn load_or_create(&self, job_id: &str) -> CheckpointResult<JobCheckpoint> {
        match self.load().await? {
            Some(checkpoint) => Ok(checkpoint),
            None => {
                let checkpoint = JobCheckpoint::new(job_id);
                self.save(&checkpoint).await?;
                Ok(checkpoint)
            }
        }
    }

    pub async fn save(&self, checkpoint: &JobCheckpoint) -> CheckpointResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| CheckpointError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let bytes =
            serde_json::to_vec_pretty(checkpoint).map_err(|source| CheckpointError::Serde {
                path: self.path.clone(),
                source,
            })?;
        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|source| CheckpointError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        file.write_all(&bytes)
            .await
            .map_err(|source| CheckpointError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        file.sync_all()
            .await
            .map_err(|source| CheckpointError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        drop(file);
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| CheckpointError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(())
    }
}
