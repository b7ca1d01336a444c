mod ffmpeg;
mod profiles;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ffmpeg::FfmpegEncoder;
pub use profiles::{RenditionProfile, Resolution, ALL_RESOLUTIONS};

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("probe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },
    #[error("no video stream in {path}")]
    MissingVideoStream { path: PathBuf },
    #[error("transcode to {resolution} failed: {message}")]
    Transcode {
        resolution: Resolution,
        message: String,
    },
    #[error("thumbnail generation failed: {message}")]
    Thumbnail { message: String },
    #[error("encoder process timed out after {0:?}")]
    Timeout(Duration),
    #[error("encoder io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type EncoderResult<T> = Result<T, EncoderError>;

/// Probed characteristics of a source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoInfo {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: Option<u32>,
    pub codec: Option<String>,
    pub size_bytes: u64,
}

impl VideoInfo {
    pub fn resolution_label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

pub type ProgressFn = Box<dyn Fn(f64) + Send + Sync>;

/// Seam over the external media encoder; the pipeline only ever talks to
/// this trait.
#[async_trait]
pub trait MediaEncoder: Send + Sync {
    async fn probe(&self, path: &Path) -> EncoderResult<VideoInfo>;

    /// Produces a full HLS rendition (playlist plus segments) for one
    /// profile in `output_dir`, reporting percent progress as it goes.
    async fn transcode_hls(
        &self,
        input: &Path,
        output_dir: &Path,
        profile: &RenditionProfile,
        progress: ProgressFn,
    ) -> EncoderResult<()>;

    async fn thumbnail(
        &self,
        input: &Path,
        output_path: &Path,
        timestamp_seconds: f64,
        size: (u32, u32),
    ) -> EncoderResult<()>;
}
