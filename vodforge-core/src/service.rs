use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::config::RetrySection;
use crate::encoder::{Resolution, ALL_RESOLUTIONS};
use crate::job::{
    Environment, Job, JobCounts, JobLog, JobStatus, JobStoreError, LogLevel, SqliteJobStore,
};
use crate::queue::{
    EnqueueOptions, QueueCounts, QueueEntry, QueueError, SqliteQueueStore, TranscodeRequest,
};
use crate::store::{Bucket, ObjectStore};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("job {job_id} not found")]
    NotFound { job_id: String },
    #[error("source object {key} not found")]
    SourceMissing { key: String },
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    JobStore(#[from] JobStoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub original_key: String,
    pub resolutions: Option<Vec<String>>,
    pub priority: Option<i64>,
    pub video_name: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub original_key: String,
    pub video_name: String,
    pub environment: Environment,
    pub callback_url: Option<String>,
    pub resolutions: Vec<Resolution>,
    pub status: JobStatus,
}

/// Thin submission/query surface over the queue and the job store; every
/// consumer (the ctl binary, the out-of-scope HTTP facade) goes through
/// this value.
#[derive(Clone)]
pub struct JobService {
    job_store: SqliteJobStore,
    queue: SqliteQueueStore,
    object_store: Arc<dyn ObjectStore>,
    scratch_root: PathBuf,
    retry: RetrySection,
}

impl JobService {
    pub fn new(
        job_store: SqliteJobStore,
        queue: SqliteQueueStore,
        object_store: Arc<dyn ObjectStore>,
        scratch_root: impl Into<PathBuf>,
        retry: RetrySection,
    ) -> Self {
        Self {
            job_store,
            queue,
            object_store,
            scratch_root: scratch_root.into(),
            retry,
        }
    }

    fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions {
            attempts: self.retry.attempts,
            backoff_base_ms: self.retry.backoff_base_ms,
            keep_completed: self.retry.keep_completed,
            keep_failed: self.retry.keep_failed,
        }
    }

    pub async fn submit(&self, request: SubmitRequest) -> ServiceResult<SubmitReceipt> {
        let original_key = request.original_key.trim().to_string();
        if original_key.is_empty() {
            return Err(ServiceError::Validation("key is required".into()));
        }

        let resolutions = parse_resolutions(request.resolutions.as_deref())?;
        let video_name = resolve_video_name(request.video_name.as_deref(), &original_key)?;

        if let Some(callback_url) = request.callback_url.as_deref() {
            let parsed = Url::parse(callback_url).map_err(|_| {
                ServiceError::Validation("callback_url must be a valid http or https URL".into())
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ServiceError::Validation(
                    "callback_url must be a valid http or https URL".into(),
                ));
            }
        }
        let environment = Environment::derive_from_callback(request.callback_url.as_deref());

        // Pre-check the source. A confirmed miss is a 404 to the caller; a
        // failing pre-check is only a warning since the source may appear
        // before the worker picks the job up.
        match self.object_store.head(&original_key, Bucket::Source).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(ServiceError::SourceMissing {
                    key: original_key,
                })
            }
            Err(err) => {
                warn!(key = %original_key, error = %err, "source pre-check failed, continuing");
            }
        }

        let job_id = Uuid::new_v4().to_string();
        let mut job = Job::new(&job_id, &original_key, &video_name, resolutions.clone());
        job.environment = environment;
        job.callback_url = request.callback_url.clone();
        job.priority = request.priority.unwrap_or(0);
        self.job_store.create_job(&job)?;
        self.job_store.add_log(
            &job_id,
            LogLevel::Info,
            &format!("job submitted for {original_key}"),
            Some("submitted"),
            None,
        )?;

        let payload = TranscodeRequest {
            job_id: job_id.clone(),
            original_key: original_key.clone(),
            resolutions: resolutions.clone(),
            video_name: video_name.clone(),
            environment,
            callback_url: request.callback_url.clone(),
        };
        self.queue
            .add(&payload, job.priority, self.enqueue_options())?;

        Ok(SubmitReceipt {
            job_id,
            original_key,
            video_name,
            environment,
            callback_url: request.callback_url,
            resolutions,
            status: JobStatus::Queued,
        })
    }

    pub fn get_job(&self, job_id: &str) -> ServiceResult<Job> {
        self.job_store
            .get_job(job_id)?
            .ok_or_else(|| ServiceError::NotFound {
                job_id: job_id.to_string(),
            })
    }

    pub fn get_job_with_logs(&self, job_id: &str) -> ServiceResult<(Job, Vec<JobLog>)> {
        self.job_store
            .get_job_with_logs(job_id)?
            .ok_or_else(|| ServiceError::NotFound {
                job_id: job_id.to_string(),
            })
    }

    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        page: usize,
        limit: usize,
    ) -> ServiceResult<Vec<Job>> {
        let limit = limit.clamp(1, 100);
        let page = page.max(1);
        match status {
            Some(status) => {
                let jobs = self.job_store.list_by_status(status)?;
                Ok(jobs
                    .into_iter()
                    .skip((page - 1) * limit)
                    .take(limit)
                    .collect())
            }
            None => Ok(self.job_store.list(limit, (page - 1) * limit)?),
        }
    }

    pub fn counts(&self) -> ServiceResult<JobCounts> {
        Ok(self.job_store.counts()?)
    }

    pub fn recent_jobs(&self, limit: usize) -> ServiceResult<Vec<Job>> {
        Ok(self.job_store.recent(limit)?)
    }

    pub fn recent_logs(&self, limit: usize) -> ServiceResult<Vec<JobLog>> {
        Ok(self.job_store.get_recent_logs(limit)?)
    }

    pub fn error_logs(&self, limit: usize) -> ServiceResult<Vec<JobLog>> {
        Ok(self.job_store.get_error_logs(limit)?)
    }

    /// Cancels a queued job. Active jobs ignore cancellation; the caller
    /// gets a conflict instead.
    pub fn cancel(&self, job_id: &str) -> ServiceResult<()> {
        let job = self.get_job(job_id)?;
        if job.status != JobStatus::Queued {
            return Err(ServiceError::Conflict(
                "only queued jobs can be cancelled".into(),
            ));
        }
        self.queue.remove_pending_for_job(job_id)?;
        self.job_store.set_error(job_id, "cancelled by user")?;
        self.job_store.add_log(
            job_id,
            LogLevel::Warn,
            "job cancelled by user",
            Some("cancelled"),
            None,
        )?;
        Ok(())
    }

    /// Re-runs a failed job: resets the record to queued and enqueues a
    /// fresh entry with the original payload.
    pub fn retry(&self, job_id: &str) -> ServiceResult<i64> {
        let job = self.get_job(job_id)?;
        if job.status != JobStatus::Failed {
            return Err(ServiceError::Conflict("only failed jobs can be retried".into()));
        }
        self.job_store.update_status(job_id, JobStatus::Queued)?;
        let payload = TranscodeRequest {
            job_id: job.job_id.clone(),
            original_key: job.original_key.clone(),
            resolutions: job.resolutions.clone(),
            video_name: job.video_name.clone(),
            environment: job.environment,
            callback_url: job.callback_url.clone(),
        };
        let entry_id = self
            .queue
            .add(&payload, job.priority, self.enqueue_options())?;
        self.job_store.add_log(
            job_id,
            LogLevel::Info,
            "job re-queued by user",
            Some("submitted"),
            None,
        )?;
        Ok(entry_id)
    }

    /// Deletes a terminal job, its logs, and its scratch directory.
    pub fn delete_job(&self, job_id: &str) -> ServiceResult<()> {
        match self.job_store.delete_job(job_id) {
            Ok(()) => {}
            Err(JobStoreError::NotFound { job_id }) => {
                return Err(ServiceError::NotFound { job_id })
            }
            Err(JobStoreError::InvalidStatus { status, .. }) => {
                return Err(ServiceError::Conflict(format!(
                    "cannot delete a {status} job"
                )))
            }
            Err(err) => return Err(err.into()),
        }
        let scratch = self.scratch_root.join(job_id);
        if scratch.exists() {
            if let Err(err) = std::fs::remove_dir_all(&scratch) {
                warn!(path = %scratch.display(), error = %err, "failed to remove scratch directory");
            }
        }
        Ok(())
    }

    pub fn queue_stats(&self) -> ServiceResult<QueueCounts> {
        Ok(self.queue.counts()?)
    }

    pub fn active_entries(&self) -> ServiceResult<Vec<QueueEntry>> {
        Ok(self.queue.active_entries()?)
    }

    pub fn failed_entries(&self, limit: usize) -> ServiceResult<Vec<QueueEntry>> {
        Ok(self.queue.failed_entries(limit)?)
    }

    pub fn retry_entry(&self, entry_id: i64) -> ServiceResult<()> {
        Ok(self.queue.retry_entry(entry_id)?)
    }

    pub fn remove_entry(&self, entry_id: i64) -> ServiceResult<()> {
        Ok(self.queue.remove(entry_id)?)
    }

    pub fn pause(&self) -> ServiceResult<()> {
        Ok(self.queue.pause()?)
    }

    pub fn resume(&self) -> ServiceResult<()> {
        Ok(self.queue.resume()?)
    }

    pub fn is_paused(&self) -> ServiceResult<bool> {
        Ok(self.queue.is_paused()?)
    }
}

fn parse_resolutions(requested: Option<&[String]>) -> ServiceResult<Vec<Resolution>> {
    let Some(requested) = requested else {
        return Ok(ALL_RESOLUTIONS.to_vec());
    };
    if requested.is_empty() {
        return Ok(ALL_RESOLUTIONS.to_vec());
    }
    let mut resolutions = Vec::with_capacity(requested.len());
    for label in requested {
        let resolution: Resolution = label.parse().map_err(|_| {
            ServiceError::Validation(format!(
                "invalid resolution {label}; allowed values: 1080p, 720p, 480p, 360p, 240p"
            ))
        })?;
        if !resolutions.contains(&resolution) {
            resolutions.push(resolution);
        }
    }
    Ok(resolutions)
}

fn resolve_video_name(requested: Option<&str>, original_key: &str) -> ServiceResult<String> {
    let name = match requested {
        Some(name) => name.to_string(),
        None => default_video_name(original_key),
    };
    let pattern = regex::Regex::new("^[A-Za-z0-9_-]+$")
        .map_err(|err| ServiceError::Validation(err.to_string()))?;
    if !pattern.is_match(&name) {
        return Err(ServiceError::Validation(
            "videoName must contain only alphanumeric characters, hyphens, and underscores".into(),
        ));
    }
    Ok(name)
}

fn default_video_name(original_key: &str) -> String {
    let base = original_key
        .rsplit('/')
        .next()
        .unwrap_or(original_key);
    let stem = base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base);
    // Key characters outside the allowed set are normalized away.
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
