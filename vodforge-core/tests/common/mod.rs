#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use vodforge_core::{
    EncoderError, EncoderResult, FsObjectStore, MediaEncoder, RenditionProfile, Resolution,
    Services, VideoInfo, VodforgeConfig,
};

/// Encoder stub: fabricates playlist/segment files instead of running
/// ffmpeg, with per-resolution failure injection and call accounting.
pub struct StubEncoder {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub segments: usize,
    pub fail_thumbnails: bool,
    encode_counts: Mutex<HashMap<Resolution, usize>>,
    failures_remaining: Mutex<HashMap<Resolution, usize>>,
}

impl StubEncoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            duration: 120.0,
            segments: 3,
            fail_thumbnails: false,
            encode_counts: Mutex::new(HashMap::new()),
            failures_remaining: Mutex::new(HashMap::new()),
        }
    }

    /// The next `count` encodes of `resolution` will fail.
    pub fn fail_next(&self, resolution: Resolution, count: usize) {
        self.failures_remaining
            .lock()
            .unwrap()
            .insert(resolution, count);
    }

    pub fn encode_count(&self, resolution: Resolution) -> usize {
        self.encode_counts
            .lock()
            .unwrap()
            .get(&resolution)
            .copied()
            .unwrap_or(0)
    }

}

#[async_trait]
impl MediaEncoder for StubEncoder {
    async fn probe(&self, path: &Path) -> EncoderResult<VideoInfo> {
        let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Ok(VideoInfo {
            duration_seconds: self.duration,
            width: self.width,
            height: self.height,
            bitrate_kbps: Some(2500),
            codec: Some("h264".into()),
            size_bytes,
        })
    }

    async fn transcode_hls(
        &self,
        _input: &Path,
        output_dir: &Path,
        profile: &RenditionProfile,
        progress: vodforge_core::ProgressFn,
    ) -> EncoderResult<()> {
        *self
            .encode_counts
            .lock()
            .unwrap()
            .entry(profile.resolution)
            .or_insert(0) += 1;
        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&profile.resolution) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EncoderError::Transcode {
                        resolution: profile.resolution,
                        message: "injected encode failure".into(),
                    });
                }
            }
        }
        std::fs::create_dir_all(output_dir).unwrap();
        let mut playlist = String::from(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-PLAYLIST-TYPE:VOD\n",
        );
        for n in 0..self.segments {
            let name = format!("index-{n:05}.ts");
            std::fs::write(
                output_dir.join(&name),
                format!("SEGMENT {} {n}\n", profile.resolution),
            )
            .unwrap();
            playlist.push_str(&format!("#EXTINF:10.0,\n{name}\n"));
        }
        playlist.push_str("#EXT-X-ENDLIST\n");
        std::fs::write(output_dir.join("index-.m3u8"), playlist).unwrap();
        progress(50.0);
        progress(100.0);
        Ok(())
    }

    async fn thumbnail(
        &self,
        _input: &Path,
        output_path: &Path,
        _timestamp_seconds: f64,
        _size: (u32, u32),
    ) -> EncoderResult<()> {
        if self.fail_thumbnails {
            return Err(EncoderError::Thumbnail {
                message: "injected thumbnail failure".into(),
            });
        }
        std::fs::write(output_path, b"THUMB").unwrap();
        Ok(())
    }
}

pub struct Fixture {
    pub services: Services,
    pub encoder: Arc<StubEncoder>,
    pub object_root: std::path::PathBuf,
    _base: TempDir,
}

/// Workspace with fast test timings, a directory-backed object store, and
/// the stub encoder.
pub fn fixture(encoder: StubEncoder) -> Fixture {
    let base = TempDir::new().unwrap();
    let object_root = base.path().join("buckets");
    std::fs::create_dir_all(object_root.join("source")).unwrap();
    std::fs::create_dir_all(object_root.join("output")).unwrap();

    let mut config = VodforgeConfig::default();
    config.paths.data_dir = base.path().join("data").to_string_lossy().to_string();
    config.paths.scratch_dir = base.path().join("scratch").to_string_lossy().to_string();
    config.limits.queue_poll_ms = 20;
    config.limits.heartbeat_seconds = 1;
    config.retry.backoff_base_ms = 0;

    let encoder = Arc::new(encoder);
    let services = Services::with_backends(
        config,
        Arc::new(FsObjectStore::new(&object_root)),
        encoder.clone(),
    )
    .unwrap();
    Fixture {
        services,
        encoder,
        object_root,
        _base: base,
    }
}

pub fn seed_source(fixture: &Fixture, key: &str) {
    let path = fixture.object_root.join("source").join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"FAKE SOURCE VIDEO").unwrap();
}

pub fn output_exists(fixture: &Fixture, key: &str) -> bool {
    fixture.object_root.join("output").join(key).exists()
}

pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}
