use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoder::Resolution;
use crate::job::Environment;

/// Extensions accepted without a warning at intake.
pub const SUPPORTED_EXTENSIONS: [&str; 9] = [
    "mp4", "mov", "mkv", "avi", "webm", "m4v", "flv", "wmv", "mpg",
];

pub fn is_supported_extension(key: &str) -> bool {
    Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub fn content_type_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "m3u8" => "application/vnd.apple.mpegurl",
        "ts" => "video/mp2t",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Terminal result of a successful pipeline run; recorded as the queue
/// entry result and used to finalize the job record and the callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineReport {
    pub job_id: String,
    pub original_key: String,
    pub output_key: String,
    pub video_name: String,
    pub environment: Environment,
    pub valid_resolutions: Vec<Resolution>,
    pub total_size: u64,
    pub duration_seconds: Option<f64>,
    pub original_width: u32,
    pub original_height: u32,
    pub completed_at: DateTime<Utc>,
}

impl PipelineReport {
    pub fn original_resolution(&self) -> String {
        format!("{}x{}", self.original_width, self.original_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_support() {
        assert!(is_supported_extension("uploads/a.mp4"));
        assert!(is_supported_extension("uploads/a.MOV"));
        assert!(!is_supported_extension("uploads/a.exe"));
        assert!(!is_supported_extension("uploads/noext"));
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("index-.m3u8"), "application/vnd.apple.mpegurl");
        assert_eq!(content_type_for("index-00000.ts"), "video/mp2t");
        assert_eq!(content_type_for("a-00001.jpg"), "image/jpeg");
        assert_eq!(content_type_for("a-00001.png"), "image/png");
        assert_eq!(content_type_for("mystery.bin"), "application/octet-stream");
    }
}
