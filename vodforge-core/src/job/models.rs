use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::encoder::Resolution;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The legal transition set. Everything else fails loudly.
    pub fn can_transition(self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Queued)
                | (JobStatus::Queued, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Staging callbacks are recognized by a "stage" marker in the URL.
    pub fn derive_from_callback(callback_url: Option<&str>) -> Self {
        match callback_url {
            Some(url) if url.contains("stage") => Environment::Staging,
            _ => Environment::Production,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub original_key: String,
    pub output_key: Option<String>,
    pub status: JobStatus,
    pub progress: i64,
    pub error_message: Option<String>,
    pub resolutions: Vec<Resolution>,
    pub video_name: String,
    pub environment: Environment,
    pub callback_url: Option<String>,
    pub priority: i64,
    pub file_size: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        job_id: impl Into<String>,
        original_key: impl Into<String>,
        video_name: impl Into<String>,
        resolutions: Vec<Resolution>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            original_key: original_key.into(),
            output_key: None,
            status: JobStatus::Queued,
            progress: 0,
            error_message: None,
            resolutions,
            video_name: video_name.into(),
            environment: Environment::Production,
            callback_url: None,
            priority: 0,
            file_size: None,
            duration_seconds: None,
            created_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: Option<NaiveDateTime> = row.get("created_at")?;
        let started_at: Option<NaiveDateTime> = row.get("started_at")?;
        let completed_at: Option<NaiveDateTime> = row.get("completed_at")?;
        let resolutions: String = row.get("resolutions")?;
        Ok(Self {
            job_id: row.get("job_id")?,
            original_key: row.get("original_key")?,
            output_key: row.get("output_key")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(JobStatus::Queued),
            progress: row.get("progress")?,
            error_message: row.get("error_message")?,
            resolutions: Self::parse_resolutions(&resolutions),
            video_name: row.get("video_name")?,
            environment: row
                .get::<_, String>("environment")?
                .parse()
                .unwrap_or(Environment::Production),
            callback_url: row.get("callback_url")?,
            priority: row.get("priority")?,
            file_size: row.get("file_size")?,
            duration_seconds: row.get("duration_seconds")?,
            created_at: created_at.map(|dt| Utc.from_utc_datetime(&dt)),
            started_at: started_at.map(|dt| Utc.from_utc_datetime(&dt)),
            completed_at: completed_at.map(|dt| Utc.from_utc_datetime(&dt)),
        })
    }

    pub fn serialize_resolutions(resolutions: &[Resolution]) -> String {
        resolutions
            .iter()
            .map(Resolution::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn parse_resolutions(value: &str) -> Vec<Resolution> {
        value
            .split(',')
            .filter_map(|item| item.trim().parse().ok())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobLog {
    pub id: i64,
    pub job_id: String,
    pub level: LogLevel,
    pub message: String,
    pub stage: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl JobLog {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: Option<NaiveDateTime> = row.get("created_at")?;
        let details: Option<String> = row.get("details")?;
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            level: row
                .get::<_, String>("level")?
                .parse()
                .unwrap_or(LogLevel::Info),
            message: row.get("message")?,
            stage: row.get("stage")?,
            details: details.and_then(|value| serde_json::from_str(&value).ok()),
            created_at: created_at.map(|dt| Utc.from_utc_datetime(&dt)),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        assert!(JobStatus::Queued.can_transition(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition(JobStatus::Failed));
        assert!(JobStatus::Failed.can_transition(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition(JobStatus::Failed));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!JobStatus::Completed.can_transition(JobStatus::Queued));
        assert!(!JobStatus::Completed.can_transition(JobStatus::Processing));
        assert!(!JobStatus::Queued.can_transition(JobStatus::Completed));
        assert!(!JobStatus::Failed.can_transition(JobStatus::Processing));
        assert!(!JobStatus::Processing.can_transition(JobStatus::Queued));
    }

    #[test]
    fn environment_derivation() {
        assert_eq!(
            Environment::derive_from_callback(Some("https://stage.example.com/cb")),
            Environment::Staging
        );
        assert_eq!(
            Environment::derive_from_callback(Some("https://app.example.com/cb")),
            Environment::Production
        );
        assert_eq!(Environment::derive_from_callback(None), Environment::Production);
    }

    #[test]
    fn resolution_round_trip() {
        use crate::encoder::Resolution;
        let list = vec![Resolution::P1080, Resolution::P360];
        let joined = Job::serialize_resolutions(&list);
        assert_eq!(joined, "1080p,360p");
        assert_eq!(Job::parse_resolutions(&joined), list);
    }
}
