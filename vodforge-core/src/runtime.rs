use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use crate::config::VodforgeConfig;
use crate::encoder::{FfmpegEncoder, MediaEncoder};
use crate::error::ConfigError;
use crate::job::{JobStoreError, SqliteJobStore};
use crate::pipeline::{CallbackClient, JobEventRelay, PipelineError, TranscodePipeline};
use crate::queue::{QueueError, QueueWorker, QueueWorkerConfig, SqliteQueueStore};
use crate::reaper::Reaper;
use crate::service::JobService;
use crate::store::{B2ObjectStore, ObjectStore, ObjectStoreError};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    JobStore(#[from] JobStoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Long-lived handles built once at startup and passed down explicitly.
/// Initialization order is strict: job store, then queue, then the rest.
#[derive(Clone)]
pub struct Services {
    pub config: VodforgeConfig,
    pub job_store: SqliteJobStore,
    pub queue: SqliteQueueStore,
    pub object_store: Arc<dyn ObjectStore>,
    pub encoder: Arc<dyn MediaEncoder>,
}

impl Services {
    pub fn initialize(config: VodforgeConfig) -> RuntimeResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.paths.data_dir)?;
        std::fs::create_dir_all(config.scratch_root())?;

        let job_store = SqliteJobStore::builder().path(config.jobs_db_path()).build()?;
        job_store.initialize()?;

        let queue = SqliteQueueStore::builder()
            .path(config.queue_db_path())
            .retention(config.retry.keep_completed, config.retry.keep_failed)
            .build()?;
        queue.initialize()?;

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(B2ObjectStore::new(config.object_store.clone())?);
        let encoder: Arc<dyn MediaEncoder> = Arc::new(FfmpegEncoder::new(&config.encoder));

        Ok(Self {
            config,
            job_store,
            queue,
            object_store,
            encoder,
        })
    }

    /// Variant for callers that bring their own store/encoder seams
    /// (tests, air-gapped runs).
    pub fn with_backends(
        config: VodforgeConfig,
        object_store: Arc<dyn ObjectStore>,
        encoder: Arc<dyn MediaEncoder>,
    ) -> RuntimeResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.paths.data_dir)?;
        std::fs::create_dir_all(config.scratch_root())?;

        let job_store = SqliteJobStore::builder().path(config.jobs_db_path()).build()?;
        job_store.initialize()?;
        let queue = SqliteQueueStore::builder()
            .path(config.queue_db_path())
            .retention(config.retry.keep_completed, config.retry.keep_failed)
            .build()?;
        queue.initialize()?;

        Ok(Self {
            config,
            job_store,
            queue,
            object_store,
            encoder,
        })
    }

    pub fn job_service(&self) -> JobService {
        JobService::new(
            self.job_store.clone(),
            self.queue.clone(),
            self.object_store.clone(),
            self.config.scratch_root(),
            self.config.retry.clone(),
        )
    }

    /// Runs the transcoding worker until the shutdown signal flips: queue
    /// dispatcher, job-store relay, and the cleanup reaper.
    pub async fn run_worker(&self, shutdown: watch::Receiver<bool>) -> RuntimeResult<()> {
        let callbacks = CallbackClient::new(&self.config.callback)?;
        let pipeline = Arc::new(TranscodePipeline::new(
            self.job_store.clone(),
            self.object_store.clone(),
            self.encoder.clone(),
            callbacks.clone(),
            self.config.scratch_root(),
        ));

        let worker_config = QueueWorkerConfig {
            concurrency: self.config.limits.max_concurrent_jobs,
            poll_interval: Duration::from_millis(self.config.limits.queue_poll_ms),
            heartbeat_interval: Duration::from_secs(self.config.limits.heartbeat_seconds),
            stall_window: chrono::Duration::seconds(self.config.limits.stall_window_seconds),
            clean_age: chrono::Duration::hours(self.config.limits.queue_retention_hours),
            ..QueueWorkerConfig::default()
        };
        let (worker, events) = QueueWorker::new(self.queue.clone(), pipeline, worker_config);

        let relay = JobEventRelay::new(self.job_store.clone(), callbacks);
        let relay_task = tokio::spawn(relay.run(events));

        let reaper = Reaper::new(&self.config, self.queue.clone());
        let reaper_task = tokio::spawn(reaper.run(shutdown.clone()));

        info!(
            concurrency = self.config.limits.max_concurrent_jobs,
            scratch = %self.config.scratch_root().display(),
            "worker services started"
        );
        let run_result = worker.run(shutdown).await;
        drop(worker);

        let _ = reaper_task.await;
        let _ = relay_task.await;
        run_result?;
        info!("worker stopped cleanly");
        Ok(())
    }
}
