mod callback;
mod error;
mod relay;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, JobCheckpoint, Stage, UploadedFile};
use crate::encoder::{MediaEncoder, Resolution};
use crate::job::{LogLevel, SqliteJobStore};
use crate::queue::{ActiveEntry, EntryHandler, HandlerError, TranscodeRequest};
use crate::store::{Bucket, ObjectStore};

pub use callback::CallbackClient;
pub use error::{PipelineError, PipelineResult};
pub use relay::JobEventRelay;
pub use types::{content_type_for, is_supported_extension, PipelineReport, SUPPORTED_EXTENSIONS};

pub const MASTER_PLAYLIST_NAME: &str = "index.m3u8";
const RENDITION_PLAYLIST_NAME: &str = "index-.m3u8";
const THUMBNAIL_TIMESTAMP_SECONDS: f64 = 1.0;
const THUMBNAIL_SIZE: (u32, u32) = (320, 240);

/// The stage machine composing object store, encoder, checkpoint, and job
/// store. One instance serves every worker slot; per-job state lives in the
/// scratch directory and its checkpoint.
pub struct TranscodePipeline {
    job_store: SqliteJobStore,
    object_store: Arc<dyn ObjectStore>,
    encoder: Arc<dyn MediaEncoder>,
    callbacks: CallbackClient,
    scratch_root: PathBuf,
}

impl TranscodePipeline {
    pub fn new(
        job_store: SqliteJobStore,
        object_store: Arc<dyn ObjectStore>,
        encoder: Arc<dyn MediaEncoder>,
        callbacks: CallbackClient,
        scratch_root: impl AsRef<Path>,
    ) -> Self {
        Self {
            job_store,
            object_store,
            encoder,
            callbacks,
            scratch_root: scratch_root.as_ref().to_path_buf(),
        }
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.scratch_root.join(job_id)
    }

    pub async fn run(&self, active: &ActiveEntry) -> PipelineResult<PipelineReport> {
        let request = active.payload().clone();
        let job_dir = self.job_dir(&request.job_id);
        let checkpoint_store = CheckpointStore::new(&job_dir);
        fs::create_dir_all(&job_dir)
            .await
            .map_err(|source| PipelineError::io(&job_dir, source))?;
        let mut checkpoint = checkpoint_store.load_or_create(&request.job_id).await?;

        // Idempotent replay: a completed checkpoint short-circuits.
        if checkpoint.stage == Stage::Completed {
            info!(job_id = %request.job_id, "checkpoint already completed, replaying result");
            return Ok(self.build_report(&request, &checkpoint));
        }
        if checkpoint.stage == Stage::Failed {
            checkpoint.stage = Stage::Initialized;
            checkpoint.error = None;
        }

        match self
            .execute(&request, active, &job_dir, &checkpoint_store, &mut checkpoint)
            .await
        {
            Ok(report) => Ok(report),
            Err(err) => {
                checkpoint.mark_failed(err.to_string());
                if let Err(save_err) = checkpoint_store.save(&checkpoint).await {
                    warn!(job_id = %request.job_id, error = %save_err, "failed to persist failure checkpoint");
                }
                self.log(
                    &request.job_id,
                    LogLevel::Error,
                    &format!("pipeline failed: {err}"),
                    Some("pipeline"),
                    None,
                );
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        request: &TranscodeRequest,
        active: &ActiveEntry,
        job_dir: &Path,
        checkpoint_store: &CheckpointStore,
        checkpoint: &mut JobCheckpoint,
    ) -> PipelineResult<PipelineReport> {
        if !checkpoint.is_stage_completed(Stage::Initialized) {
            self.initialize(request, job_dir, checkpoint_store, checkpoint)
                .await?;
            active.progress(5);
        }

        if !checkpoint.is_stage_completed(Stage::Downloaded) {
            self.download(request, job_dir, checkpoint_store, checkpoint)
                .await?;
            active.progress(10);
        }

        if !checkpoint.is_stage_completed(Stage::Analyzed) {
            self.analyze(request, checkpoint_store, checkpoint).await?;
            active.progress(12);
        }

        if !checkpoint.is_stage_completed(Stage::ThumbnailsGenerated) {
            self.generate_thumbnails(request, job_dir, checkpoint_store, checkpoint)
                .await?;
            active.progress(15);
        }

        if !checkpoint.is_stage_completed(Stage::Transcoded) {
            self.transcode_and_upload(request, active, job_dir, checkpoint_store, checkpoint)
                .await?;
        }
        active.progress(80);

        if !checkpoint.is_stage_completed(Stage::Uploaded) {
            self.upload_master_playlist(request, active, job_dir, checkpoint_store, checkpoint)
                .await?;
            active.progress(85);
            self.upload_thumbnails(request, checkpoint_store, checkpoint)
                .await?;
            if let Some(source) = checkpoint.downloaded_file.clone() {
                if let Err(err) = fs::remove_file(&source).await {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %source.display(), error = %err, "failed to delete downloaded source");
                    }
                }
            }
            checkpoint.mark_stage(Stage::Uploaded);
            checkpoint_store.save(checkpoint).await?;
            active.progress(90);
        }

        let report = self.build_report(request, checkpoint);
        self.callbacks
            .send_success(request.callback_url.as_deref(), &report)
            .await?;
        active.progress(95);
        self.log(
            &request.job_id,
            LogLevel::Info,
            "completion callback delivered",
            Some("callback"),
            None,
        );

        checkpoint.mark_stage(Stage::Completed);
        checkpoint_store.save(checkpoint).await?;
        active.progress(100);
        self.log(
            &request.job_id,
            LogLevel::Info,
            &format!(
                "job completed: {} renditions, {} bytes uploaded",
                report.valid_resolutions.len(),
                report.total_size
            ),
            Some("completed"),
            None,
        );
        Ok(report)
    }

    async fn initialize(
        &self,
        request: &TranscodeRequest,
        job_dir: &Path,
        checkpoint_store: &CheckpointStore,
        checkpoint: &mut JobCheckpoint,
    ) -> PipelineResult<()> {
        fs::create_dir_all(job_dir)
            .await
            .map_err(|source| PipelineError::io(job_dir, source))?;
        if !is_supported_extension(&request.original_key) {
            warn!(key = %request.original_key, "unrecognized source extension");
            self.log(
                &request.job_id,
                LogLevel::Warn,
                &format!("unrecognized source extension for {}", request.original_key),
                Some("initialized"),
                None,
            );
        }
        checkpoint.mark_stage(Stage::Initialized);
        checkpoint_store.save(checkpoint).await?;
        self.log(
            &request.job_id,
            LogLevel::Info,
            "job initialized",
            Some("initialized"),
            None,
        );
        Ok(())
    }

    async fn download(
        &self,
        request: &TranscodeRequest,
        job_dir: &Path,
        checkpoint_store: &CheckpointStore,
        checkpoint: &mut JobCheckpoint,
    ) -> PipelineResult<()> {
        let file_name = request
            .original_key
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("source.bin");
        let local_path = job_dir.join(file_name);
        if !local_path.exists() {
            let bytes = self
                .object_store
                .download(&request.original_key, &local_path, Bucket::Source)
                .await
                .map_err(|source| PipelineError::Download { source })?;
            self.log(
                &request.job_id,
                LogLevel::Info,
                &format!("downloaded {} ({bytes} bytes)", request.original_key),
                Some("downloaded"),
                None,
            );
        }
        checkpoint.downloaded_file = Some(local_path);
        checkpoint.mark_stage(Stage::Downloaded);
        checkpoint_store.save(checkpoint).await?;
        Ok(())
    }

    async fn analyze(
        &self,
        request: &TranscodeRequest,
        checkpoint_store: &CheckpointStore,
        checkpoint: &mut JobCheckpoint,
    ) -> PipelineResult<()> {
        let source = checkpoint
            .downloaded_file
            .clone()
            .ok_or_else(|| PipelineError::Validation {
                message: "downloaded source missing from checkpoint".into(),
            })?;
        let info = match checkpoint.video_info.clone() {
            Some(info) => info,
            None => self.encoder.probe(&source).await?,
        };
        // No-upscale rule: keep the requested order, drop anything taller
        // than the source.
        let valid: Vec<Resolution> = request
            .resolutions
            .iter()
            .copied()
            .filter(|resolution| resolution.height() <= info.height)
            .collect();
        if valid.is_empty() {
            return Err(PipelineError::Validation {
                message: format!(
                    "validation: no transcodable resolutions for {}x{} source",
                    info.width, info.height
                ),
            });
        }
        self.log(
            &request.job_id,
            LogLevel::Info,
            &format!(
                "analyzed source: {}x{}, {:.1}s",
                info.width, info.height, info.duration_seconds
            ),
            Some("analyzed"),
            Some(&serde_json::json!({
                "width": info.width,
                "height": info.height,
                "duration": info.duration_seconds,
                "codec": info.codec,
                "valid_resolutions": valid,
            })),
        );
        checkpoint.video_info = Some(info);
        checkpoint.valid_resolutions = valid;
        checkpoint.mark_stage(Stage::Analyzed);
        checkpoint_store.save(checkpoint).await?;
        Ok(())
    }

    /// Thumbnail failure is non-fatal: the job proceeds with an empty list.
    async fn generate_thumbnails(
        &self,
        request: &TranscodeRequest,
        job_dir: &Path,
        checkpoint_store: &CheckpointStore,
        checkpoint: &mut JobCheckpoint,
    ) -> PipelineResult<()> {
        if checkpoint.thumbnail_paths.is_empty() {
            if let Some(source) = checkpoint.downloaded_file.clone() {
                let jpg = job_dir.join(format!("{}-00001.jpg", request.video_name));
                let png = job_dir.join(format!("{}-00001.png", request.video_name));
                let jpg_result = self
                    .encoder
                    .thumbnail(&source, &jpg, THUMBNAIL_TIMESTAMP_SECONDS, THUMBNAIL_SIZE)
                    .await;
                let png_result = self
                    .encoder
                    .thumbnail(&source, &png, THUMBNAIL_TIMESTAMP_SECONDS, THUMBNAIL_SIZE)
                    .await;
                match (jpg_result, png_result) {
                    (Ok(()), Ok(())) => {
                        checkpoint.thumbnail_paths = vec![jpg, png];
                    }
                    (jpg_result, png_result) => {
                        let err = jpg_result
                            .err()
                            .or(png_result.err())
                            .map(|err| err.to_string())
                            .unwrap_or_default();
                        warn!(job_id = %request.job_id, error = %err, "thumbnail generation failed");
                        self.log(
                            &request.job_id,
                            LogLevel::Warn,
                            &format!("thumbnail generation failed: {err}"),
                            Some("thumbnails_generated"),
                            None,
                        );
                        checkpoint.thumbnail_paths = Vec::new();
                    }
                }
            }
        }
        checkpoint.mark_stage(Stage::ThumbnailsGenerated);
        checkpoint_store.save(checkpoint).await?;
        Ok(())
    }

    /// Renditions run sequentially in descending height order. Each one is
    /// encoded, uploaded playlist-first, then deleted locally before the
    /// next starts, so peak disk usage stays at one rendition.
    async fn transcode_and_upload(
        &self,
        request: &TranscodeRequest,
        active: &ActiveEntry,
        job_dir: &Path,
        checkpoint_store: &CheckpointStore,
        checkpoint: &mut JobCheckpoint,
    ) -> PipelineResult<()> {
        let source = checkpoint
            .downloaded_file
            .clone()
            .ok_or_else(|| PipelineError::Validation {
                message: "downloaded source missing from checkpoint".into(),
            })?;
        let mut targets = checkpoint.valid_resolutions.clone();
        targets.sort_by(|a, b| b.height().cmp(&a.height()));
        let budget = 65.0 / targets.len() as f64;

        for (index, resolution) in targets.iter().copied().enumerate() {
            if checkpoint.is_resolution_completed(resolution) {
                continue;
            }
            let base = 15.0 + budget * index as f64;
            let half = budget / 2.0;
            let rendition_dir = job_dir.join(format!("hls_{resolution}"));

            let reporter = active.clone();
            self.encoder
                .transcode_hls(
                    &source,
                    &rendition_dir,
                    resolution.profile(),
                    Box::new(move |percent| {
                        reporter.progress((base + half * percent / 100.0).round() as i64);
                    }),
                )
                .await?;
            self.log(
                &request.job_id,
                LogLevel::Info,
                &format!("encoded {resolution} rendition"),
                Some("transcoded"),
                None,
            );

            let files = rendition_files(&rendition_dir).await?;
            let total = files.len().max(1);
            for (n, (name, path)) in files.iter().enumerate() {
                let key = format!("{}/hls_{}/{}", request.video_name, resolution, name);
                if !checkpoint.has_uploaded(&key) {
                    let receipt = self
                        .object_store
                        .upload(path, &key, content_type_for(name), Bucket::Output)
                        .await
                        .map_err(|source| PipelineError::Upload {
                            key: key.clone(),
                            source,
                        })?;
                    checkpoint.add_uploaded_file(UploadedFile {
                        name: name.clone(),
                        key,
                        size: receipt.size,
                    });
                    // Record only after the upload is durable.
                    checkpoint_store.save(checkpoint).await?;
                }
                let done = (n + 1) as f64 / total as f64;
                active.progress((base + half + half * done).round() as i64);
            }

            fs::remove_dir_all(&rendition_dir)
                .await
                .map_err(|source| PipelineError::io(&rendition_dir, source))?;
            checkpoint.add_completed_resolution(resolution);
            checkpoint_store.save(checkpoint).await?;
            self.log(
                &request.job_id,
                LogLevel::Info,
                &format!("uploaded {resolution} rendition, local files reclaimed"),
                Some("transcoded"),
                None,
            );
        }

        checkpoint.mark_stage(Stage::Transcoded);
        checkpoint_store.save(checkpoint).await?;
        Ok(())
    }

    async fn upload_master_playlist(
        &self,
        request: &TranscodeRequest,
        _active: &ActiveEntry,
        job_dir: &Path,
        checkpoint_store: &CheckpointStore,
        checkpoint: &mut JobCheckpoint,
    ) -> PipelineResult<()> {
        let key = format!("{}/{}", request.video_name, MASTER_PLAYLIST_NAME);
        if !checkpoint.has_uploaded(&key) {
            let contents = build_master_playlist(&checkpoint.valid_resolutions);
            let local = job_dir.join(MASTER_PLAYLIST_NAME);
            fs::write(&local, contents)
                .await
                .map_err(|source| PipelineError::io(&local, source))?;
            let receipt = self
                .object_store
                .upload(&local, &key, content_type_for(MASTER_PLAYLIST_NAME), Bucket::Output)
                .await
                .map_err(|source| PipelineError::Upload {
                    key: key.clone(),
                    source,
                })?;
            checkpoint.add_uploaded_file(UploadedFile {
                name: MASTER_PLAYLIST_NAME.to_string(),
                key,
                size: receipt.size,
            });
            checkpoint_store.save(checkpoint).await?;
            if let Err(err) = fs::remove_file(&local).await {
                warn!(path = %local.display(), error = %err, "failed to delete local master playlist");
            }
            self.log(
                &request.job_id,
                LogLevel::Info,
                "master playlist uploaded",
                Some("uploaded"),
                None,
            );
        }
        Ok(())
    }

    async fn upload_thumbnails(
        &self,
        request: &TranscodeRequest,
        checkpoint_store: &CheckpointStore,
        checkpoint: &mut JobCheckpoint,
    ) -> PipelineResult<()> {
        for thumbnail in checkpoint.thumbnail_paths.clone() {
            let Some(name) = thumbnail.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };
            let key = format!("{}/{}", request.video_name, name);
            if checkpoint.has_uploaded(&key) {
                continue;
            }
            if !thumbnail.exists() {
                warn!(path = %thumbnail.display(), "thumbnail missing at upload time");
                continue;
            }
            let receipt = self
                .object_store
                .upload(&thumbnail, &key, content_type_for(&name), Bucket::Output)
                .await
                .map_err(|source| PipelineError::Upload {
                    key: key.clone(),
                    source,
                })?;
            checkpoint.add_uploaded_file(UploadedFile {
                name,
                key,
                size: receipt.size,
            });
            checkpoint_store.save(checkpoint).await?;
        }
        Ok(())
    }

    fn build_report(&self, request: &TranscodeRequest, checkpoint: &JobCheckpoint) -> PipelineReport {
        let (width, height, duration) = checkpoint
            .video_info
            .as_ref()
            .map(|info| (info.width, info.height, Some(info.duration_seconds)))
            .unwrap_or((0, 0, None));
        PipelineReport {
            job_id: request.job_id.clone(),
            original_key: request.original_key.clone(),
            output_key: format!("{}/{}", request.video_name, MASTER_PLAYLIST_NAME),
            video_name: request.video_name.clone(),
            environment: request.environment,
            valid_resolutions: checkpoint.valid_resolutions.clone(),
            total_size: checkpoint.total_uploaded_size(),
            duration_seconds: duration,
            original_width: width,
            original_height: height,
            completed_at: Utc::now(),
        }
    }

    fn log(
        &self,
        job_id: &str,
        level: LogLevel,
        message: &str,
        stage: Option<&str>,
        details: Option<&serde_json::Value>,
    ) {
        if let Err(err) = self.job_store.add_log(job_id, level, message, stage, details) {
            warn!(job_id, error = %err, "failed to append job log");
        }
    }
}

#[async_trait]
impl EntryHandler for TranscodePipeline {
    async fn handle(&self, entry: &ActiveEntry) -> Result<serde_json::Value, HandlerError> {
        let report = self.run(entry).await?;
        Ok(serde_json::to_value(report)?)
    }
}

/// Rendition directory contents, playlist first, segments in name order.
async fn rendition_files(dir: &Path) -> PipelineResult<Vec<(String, PathBuf)>> {
    let mut playlists = Vec::new();
    let mut segments = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|source| PipelineError::io(dir, source))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| PipelineError::io(dir, source))?
    {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        if name.ends_with(".m3u8") {
            playlists.push((name, path));
        } else if name.ends_with(".ts") {
            segments.push((name, path));
        }
    }
    segments.sort_by(|a, b| a.0.cmp(&b.0));
    playlists.extend(segments);
    Ok(playlists)
}

/// Master playlist in strictly descending height order; format is fixed.
pub fn build_master_playlist(resolutions: &[Resolution]) -> String {
    let mut sorted = resolutions.to_vec();
    sorted.sort_by(|a, b| b.height().cmp(&a.height()));
    let mut playlist = String::from("#EXTM3U\n");
    for resolution in sorted {
        let profile = resolution.profile();
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH={},RESOLUTION={}x{},CODECS=\"{}\"\n",
            profile.bandwidth(),
            profile.width,
            profile.height,
            profile.codecs
        ));
        playlist.push_str(&format!("hls_{}/{}\n", resolution, RENDITION_PLAYLIST_NAME));
    }
    playlist
}
