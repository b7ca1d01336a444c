use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::encoder::Resolution;
use crate::job::Environment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Waiting => "waiting",
            EntryState::Active => "active",
            EntryState::Completed => "completed",
            EntryState::Failed => "failed",
            EntryState::Delayed => "delayed",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(EntryState::Waiting),
            "active" => Ok(EntryState::Active),
            "completed" => Ok(EntryState::Completed),
            "failed" => Ok(EntryState::Failed),
            "delayed" => Ok(EntryState::Delayed),
            other => Err(format!("unknown queue entry state: {other}")),
        }
    }
}

/// Payload carried by each queue entry; joined to the job record by job_id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeRequest {
    pub job_id: String,
    pub original_key: String,
    pub resolutions: Vec<Resolution>,
    pub video_name: String,
    pub environment: Environment,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct EnqueueOptions {
    pub attempts: u32,
    pub backoff_base_ms: u64,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base_ms: 2000,
            keep_completed: 10,
            keep_failed: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: i64,
    pub job_id: String,
    pub payload: TranscodeRequest,
    pub priority: i64,
    pub state: EntryState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub progress: i64,
    pub eligible_at: Option<DateTime<Utc>>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl QueueEntry {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let payload: String = row.get("payload")?;
        let payload = serde_json::from_str(&payload).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?;
        let result: Option<String> = row.get("result")?;
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            payload,
            priority: row.get("priority")?,
            state: row
                .get::<_, String>("state")?
                .parse()
                .unwrap_or(EntryState::Waiting),
            attempts_made: row.get::<_, i64>("attempts_made")? as u32,
            max_attempts: row.get::<_, i64>("max_attempts")? as u32,
            backoff_base_ms: row.get::<_, i64>("backoff_base_ms")? as u64,
            progress: row.get("progress")?,
            eligible_at: get_utc(row, "eligible_at")?,
            enqueued_at: get_utc(row, "enqueued_at")?,
            processed_at: get_utc(row, "processed_at")?,
            finished_at: get_utc(row, "finished_at")?,
            heartbeat_at: get_utc(row, "heartbeat_at")?,
            last_error: row.get("last_error")?,
            result: result.and_then(|value| serde_json::from_str(&value).ok()),
        })
    }

    /// Exponential backoff for the attempt that just failed.
    pub fn retry_delay_ms(&self) -> u64 {
        let exponent = self.attempts_made.saturating_sub(1);
        self.backoff_base_ms.saturating_mul(1u64 << exponent.min(16))
    }
}

fn get_utc(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<NaiveDateTime> = row.get(column)?;
    Ok(value.map(|dt| Utc.from_utc_datetime(&dt)))
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    pub total: usize,
}

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    Retry { attempt: u32, delay_ms: u64 },
    Exhausted { attempts: u32 },
}

/// Lifecycle events emitted by the worker for store-side propagation.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Active {
        entry: QueueEntry,
    },
    Progress {
        entry_id: i64,
        job_id: String,
        progress: i64,
    },
    Completed {
        entry: QueueEntry,
        result: serde_json::Value,
    },
    Failed {
        entry: QueueEntry,
        error: String,
        disposition: FailureDisposition,
    },
    Stalled {
        entry: QueueEntry,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let mut entry = stub_entry();
        entry.backoff_base_ms = 2000;
        entry.attempts_made = 1;
        assert_eq!(entry.retry_delay_ms(), 2000);
        entry.attempts_made = 2;
        assert_eq!(entry.retry_delay_ms(), 4000);
        entry.attempts_made = 3;
        assert_eq!(entry.retry_delay_ms(), 8000);
    }

    fn stub_entry() -> QueueEntry {
        QueueEntry {
            id: 1,
            job_id: "job".into(),
            payload: TranscodeRequest {
                job_id: "job".into(),
                original_key: "uploads/a.mp4".into(),
                resolutions: vec![Resolution::P720],
                video_name: "a".into(),
                environment: crate::job::Environment::Production,
                callback_url: None,
            },
            priority: 0,
            state: EntryState::Waiting,
            attempts_made: 0,
            max_attempts: 3,
            backoff_base_ms: 2000,
            progress: 0,
            eligible_at: None,
            enqueued_at: None,
            processed_at: None,
            finished_at: None,
            heartbeat_at: None,
            last_error: None,
            result: None,
        }
    }
}
