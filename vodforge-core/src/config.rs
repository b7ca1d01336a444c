use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VodforgeConfig {
    pub paths: PathsSection,
    pub limits: LimitsSection,
    pub object_store: ObjectStoreSection,
    pub encoder: EncoderSection,
    pub callback: CallbackSection,
    pub retry: RetrySection,
    pub auth: AuthSection,
}

impl Default for VodforgeConfig {
    fn default() -> Self {
        Self {
            paths: PathsSection::default(),
            limits: LimitsSection::default(),
            object_store: ObjectStoreSection::default(),
            encoder: EncoderSection::default(),
            callback: CallbackSection::default(),
            retry: RetrySection::default(),
            auth: AuthSection::default(),
        }
    }
}

impl VodforgeConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.data_dir).join(path)
        }
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.jobs_db)
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.queue_db)
    }

    pub fn scratch_root(&self) -> PathBuf {
        PathBuf::from(&self.paths.scratch_dir)
    }

    /// Recognized environment variables override the file-provided values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_var("MAX_CONCURRENT_JOBS") {
            if let Ok(parsed) = value.parse() {
                self.limits.max_concurrent_jobs = parsed;
            }
        }
        if let Some(value) = env_var("TEMP_UPLOAD_DIR") {
            self.paths.scratch_dir = value;
        }
        if let Some(value) = env_var("JOBS_DB_PATH") {
            self.paths.jobs_db = value;
        }
        if let Some(value) = env_var("QUEUE_DB_PATH") {
            self.paths.queue_db = value;
        }
        if let Some(value) = env_var("B2_API_URL") {
            self.object_store.api_url = value;
        }
        if let Some(value) = env_var("B2_KEY_ID") {
            self.object_store.key_id = value;
        }
        if let Some(value) = env_var("B2_APPLICATION_KEY") {
            self.object_store.application_key = value;
        }
        if let Some(value) = env_var("B2_SOURCE_BUCKET") {
            self.object_store.source_bucket = value;
        }
        if let Some(value) = env_var("B2_OUTPUT_BUCKET") {
            self.object_store.output_bucket = value;
        }
        if let Some(value) = env_var("WEBAPP_CALLBACK_URL") {
            self.callback.default_url = Some(value);
        }
        if let Some(value) = env_var("CALLBACK_TOKEN").or_else(|| env_var("WEBAPP_API_KEY")) {
            self.callback.token = Some(value);
        }
        if let Some(value) = env_var("API_KEY") {
            self.auth.api_key = Some(value);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.limits.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_concurrent_jobs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.attempts".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub data_dir: String,
    pub scratch_dir: String,
    pub logs_dir: String,
    pub jobs_db: String,
    pub queue_db: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            scratch_dir: "/tmp/vodforge".into(),
            logs_dir: "./logs".into(),
            jobs_db: "jobs.sqlite".into(),
            queue_db: "queue.sqlite".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_concurrent_jobs: usize,
    pub queue_poll_ms: u64,
    pub stall_window_seconds: i64,
    pub heartbeat_seconds: u64,
    pub queue_retention_hours: i64,
    pub completed_scratch_retention_hours: i64,
    pub failed_scratch_retention_hours: i64,
    pub reaper_interval_seconds: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            queue_poll_ms: 500,
            stall_window_seconds: 120,
            heartbeat_seconds: 30,
            queue_retention_hours: 24,
            completed_scratch_retention_hours: 1,
            failed_scratch_retention_hours: 24,
            reaper_interval_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObjectStoreSection {
    pub api_url: String,
    pub key_id: String,
    pub application_key: String,
    pub source_bucket: String,
    pub output_bucket: String,
}

impl Default for ObjectStoreSection {
    fn default() -> Self {
        Self {
            api_url: "https://api.backblazeb2.com".into(),
            key_id: String::new(),
            application_key: String::new(),
            source_bucket: "uploads".into(),
            output_bucket: "streams".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderSection {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub segment_seconds: u32,
    pub crf: u32,
    pub probe_timeout_seconds: u64,
}

impl Default for EncoderSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            segment_seconds: 10,
            crf: 23,
            probe_timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallbackSection {
    pub default_url: Option<String>,
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            default_url: None,
            token: None,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub attempts: u32,
    pub backoff_base_ms: u64,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base_ms: 2000,
            keep_completed: 10,
            keep_failed: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthSection {
    pub api_key: Option<String>,
}

pub fn load_config(path: impl AsRef<Path>) -> Result<VodforgeConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let mut config: VodforgeConfig =
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_path_buf(),
        })?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Missing config file falls back to defaults plus the environment overlay.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<VodforgeConfig> {
    let path = path.as_ref();
    if path.exists() {
        load_config(path)
    } else {
        let mut config = VodforgeConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = VodforgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.limits.max_concurrent_jobs, 2);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.backoff_base_ms, 2000);
        assert_eq!(config.encoder.segment_seconds, 10);
    }

    #[test]
    fn parses_partial_toml() {
        let parsed: VodforgeConfig = toml::from_str(
            r#"
            [limits]
            max_concurrent_jobs = 4

            [object_store]
            source_bucket = "incoming"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.limits.max_concurrent_jobs, 4);
        assert_eq!(parsed.object_store.source_bucket, "incoming");
        assert_eq!(parsed.object_store.output_bucket, "streams");
    }

    #[test]
    fn resolve_path_keeps_absolute() {
        let config = VodforgeConfig::default();
        assert_eq!(
            config.resolve_path("/var/lib/jobs.sqlite"),
            PathBuf::from("/var/lib/jobs.sqlite")
        );
        assert_eq!(
            config.resolve_path("jobs.sqlite"),
            PathBuf::from("./data").join("jobs.sqlite")
        );
    }
}
