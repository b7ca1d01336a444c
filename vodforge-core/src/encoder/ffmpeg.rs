use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::EncoderSection;

use super::{
    EncoderError, EncoderResult, MediaEncoder, ProgressFn, RenditionProfile, VideoInfo,
};

/// Drives external ffmpeg/ffprobe processes. One blocking subprocess per
/// active encode; progress comes from ffmpeg's `-progress` key=value stream.
pub struct FfmpegEncoder {
    ffmpeg_path: String,
    ffprobe_path: String,
    segment_seconds: u32,
    crf: u32,
    probe_timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(config: &EncoderSection) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            segment_seconds: config.segment_seconds,
            crf: config.crf,
            probe_timeout: Duration::from_secs(config.probe_timeout_seconds),
        }
    }
}

#[async_trait]
impl MediaEncoder for FfmpegEncoder {
    async fn probe(&self, path: &Path) -> EncoderResult<VideoInfo> {
        let mut command = Command::new(&self.ffprobe_path);
        command
            .kill_on_drop(true)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path);
        let output = match timeout(self.probe_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(EncoderError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(_) => return Err(EncoderError::Timeout(self.probe_timeout)),
        };
        if !output.status.success() {
            return Err(EncoderError::Probe {
                path: path.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let parsed: FfprobeOutput =
            serde_json::from_slice(&output.stdout).map_err(|err| EncoderError::Probe {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        let video = parsed
            .streams
            .iter()
            .find(|stream| stream.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| EncoderError::MissingVideoStream {
                path: path.to_path_buf(),
            })?;
        let duration_seconds = parsed
            .format
            .duration
            .as_deref()
            .and_then(|value| value.parse::<f64>().ok())
            .or_else(|| {
                video
                    .duration
                    .as_deref()
                    .and_then(|value| value.parse::<f64>().ok())
            })
            .unwrap_or_default();
        let bitrate_kbps = video
            .bit_rate
            .as_deref()
            .and_then(|value| value.parse::<u32>().ok())
            .or_else(|| {
                parsed
                    .format
                    .bit_rate
                    .as_deref()
                    .and_then(|value| value.parse::<u32>().ok())
            })
            .map(|bits| bits / 1000);
        let size_bytes = fs::metadata(path)
            .await
            .map(|metadata| metadata.len())
            .unwrap_or_default();
        Ok(VideoInfo {
            duration_seconds,
            width: video.width.unwrap_or_default(),
            height: video.height.unwrap_or_default(),
            bitrate_kbps,
            codec: video.codec_name.clone(),
            size_bytes,
        })
    }

    async fn transcode_hls(
        &self,
        input: &Path,
        output_dir: &Path,
        profile: &RenditionProfile,
        progress: ProgressFn,
    ) -> EncoderResult<()> {
        fs::create_dir_all(output_dir)
            .await
            .map_err(|source| EncoderError::Io {
                path: output_dir.to_path_buf(),
                source,
            })?;
        // Duration denominator for the percent estimate.
        let duration = self.probe(input).await.map(|info| info.duration_seconds)?;

        let segment_pattern = output_dir.join("index-%05d.ts");
        let playlist = output_dir.join("index-.m3u8");
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .kill_on_drop(true)
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(format!("scale={}:{}", profile.width, profile.height))
            .arg("-c:v")
            .arg("libx264")
            .arg("-profile:v")
            .arg(profile.h264_profile)
            .arg("-level")
            .arg(profile.h264_level)
            .arg("-crf")
            .arg(self.crf.to_string())
            .arg("-maxrate")
            .arg(format!("{}k", profile.video_kbps))
            .arg("-bufsize")
            .arg(format!("{}k", profile.video_kbps * 2))
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(format!("{}k", profile.audio_kbps))
            .arg("-hls_time")
            .arg(self.segment_seconds.to_string())
            .arg("-hls_playlist_type")
            .arg("vod")
            .arg("-hls_segment_filename")
            .arg(&segment_pattern)
            .arg("-start_number")
            .arg("0")
            .arg("-progress")
            .arg("pipe:1")
            .arg("-nostats")
            .arg(&playlist)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| EncoderError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        let stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let progress_task = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(percent) = parse_progress_line(&line, duration) {
                        progress(percent);
                    }
                }
            }
        };
        let stderr_task = async {
            let mut buffer = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut buffer).await;
            }
            buffer
        };
        let (_, captured_stderr) = tokio::join!(progress_task, stderr_task);

        let status = child.wait().await.map_err(|source| EncoderError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        if !status.success() {
            return Err(EncoderError::Transcode {
                resolution: profile.resolution,
                message: captured_stderr.trim().to_string(),
            });
        }
        debug!(resolution = %profile.resolution, dir = %output_dir.display(), "rendition encoded");
        Ok(())
    }

    async fn thumbnail(
        &self,
        input: &Path,
        output_path: &Path,
        timestamp_seconds: f64,
        size: (u32, u32),
    ) -> EncoderResult<()> {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| EncoderError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .kill_on_drop(true)
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-ss")
            .arg(format!("{timestamp_seconds}"))
            .arg("-i")
            .arg(input)
            .arg("-frames:v")
            .arg("1")
            .arg("-vf")
            .arg(format!("scale={}:{}", size.0, size.1))
            .arg(output_path);
        let output = command.output().await.map_err(|source| EncoderError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        if !output.status.success() {
            return Err(EncoderError::Thumbnail {
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// `-progress pipe:1` emits `key=value` lines; `out_time_us` against the
/// probed duration gives the percent estimate.
fn parse_progress_line(line: &str, duration_seconds: f64) -> Option<f64> {
    let value = line.strip_prefix("out_time_us=")?.trim();
    let out_time_us = value.parse::<f64>().ok()?;
    if duration_seconds <= 0.0 {
        return None;
    }
    let percent = (out_time_us / 1_000_000.0) / duration_seconds * 100.0;
    Some(percent.clamp(0.0, 100.0))
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}
