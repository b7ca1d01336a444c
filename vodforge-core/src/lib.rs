pub mod checkpoint;
pub mod config;
pub mod encoder;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod queue;
pub mod reaper;
pub mod runtime;
pub mod service;
pub mod sqlite;
pub mod store;

pub use checkpoint::{
    CheckpointError, CheckpointStore, JobCheckpoint, Stage, UploadedFile, CHECKPOINT_FILE,
};
pub use config::{
    load_config, load_config_or_default, CallbackSection, EncoderSection, LimitsSection,
    ObjectStoreSection, PathsSection, RetrySection, VodforgeConfig,
};
pub use encoder::{
    EncoderError, EncoderResult, FfmpegEncoder, MediaEncoder, ProgressFn, RenditionProfile,
    Resolution, VideoInfo, ALL_RESOLUTIONS,
};
pub use error::{ConfigError, Result};
pub use job::{
    Environment, Job, JobCounts, JobLog, JobStatus, JobStoreError, LogLevel, SqliteJobStore,
    SqliteJobStoreBuilder,
};
pub use pipeline::{
    build_master_playlist, CallbackClient, JobEventRelay, PipelineError, PipelineReport,
    TranscodePipeline, MASTER_PLAYLIST_NAME,
};
pub use queue::{
    ActiveEntry, EnqueueOptions, EntryHandler, EntryState, FailureDisposition, QueueCounts,
    QueueEntry, QueueError, QueueEvent, QueueWorker, QueueWorkerConfig, SqliteQueueStore,
    SqliteQueueStoreBuilder, TranscodeRequest,
};
pub use reaper::{Reaper, SweepReport};
pub use runtime::{RuntimeError, Services};
pub use service::{JobService, ServiceError, SubmitReceipt, SubmitRequest};
pub use store::{
    B2ObjectStore, Bucket, FsObjectStore, ObjectInfo, ObjectStore, ObjectStoreError, StoreStage,
    UploadReceipt,
};
