use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::sqlite::configure_connection;

use super::error::{QueueError, QueueResult};
use super::models::{
    EnqueueOptions, EntryState, FailureDisposition, QueueCounts, QueueEntry, TranscodeRequest,
};

const QUEUE_SCHEMA: &str = include_str!("../../../sql/queue.sql");

#[derive(Debug, Clone)]
pub struct SqliteQueueStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
    keep_completed: usize,
    keep_failed: usize,
}

impl Default for SqliteQueueStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
            keep_completed: 10,
            keep_failed: 5,
        }
    }
}

impl SqliteQueueStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn retention(mut self, keep_completed: usize, keep_failed: usize) -> Self {
        self.keep_completed = keep_completed;
        self.keep_failed = keep_failed;
        self
    }

    pub fn build(self) -> QueueResult<SqliteQueueStore> {
        let path = self.path.ok_or(QueueError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteQueueStore {
            path,
            flags,
            keep_completed: self.keep_completed,
            keep_failed: self.keep_failed,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    path: PathBuf,
    flags: OpenFlags,
    keep_completed: usize,
    keep_failed: usize,
}

impl SqliteQueueStore {
    pub fn builder() -> SqliteQueueStoreBuilder {
        SqliteQueueStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> QueueResult<Self> {
        SqliteQueueStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> QueueResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            QueueError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| QueueError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> QueueResult<()> {
        let conn = self.open()?;
        conn.execute_batch(QUEUE_SCHEMA)?;
        Ok(())
    }

    pub fn add(
        &self,
        payload: &TranscodeRequest,
        priority: i64,
        opts: EnqueueOptions,
    ) -> QueueResult<i64> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO queue_entries (
                job_id, payload, priority, state, max_attempts, backoff_base_ms
            ) VALUES (?1, ?2, ?3, 'waiting', ?4, ?5)",
            params![
                &payload.job_id,
                serde_json::to_string(payload)?,
                priority,
                opts.attempts as i64,
                opts.backoff_base_ms as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Reserves the best eligible entry: due delayed entries are promoted,
    /// then the highest-priority oldest waiting entry becomes active.
    /// Reservation counts as the start of an attempt.
    pub fn reserve_next(&self) -> QueueResult<Option<QueueEntry>> {
        let mut conn = self.open()?;
        let now = Utc::now().naive_utc();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE queue_entries SET state = 'waiting', eligible_at = NULL
             WHERE state = 'delayed' AND eligible_at <= ?1",
            params![now],
        )?;
        let candidate: Option<i64> = tx
            .query_row(
                "SELECT id FROM queue_entries WHERE state = 'waiting'
                 ORDER BY priority DESC, id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = candidate else {
            tx.commit()?;
            return Ok(None);
        };
        tx.execute(
            "UPDATE queue_entries
             SET state = 'active', processed_at = ?2, heartbeat_at = ?2,
                 attempts_made = attempts_made + 1, progress = 0
             WHERE id = ?1",
            params![id, now],
        )?;
        let entry = tx.query_row("SELECT * FROM queue_entries WHERE id = ?1", [id], |row| {
            QueueEntry::from_row(row)
        })?;
        tx.commit()?;
        Ok(Some(entry))
    }

    pub fn heartbeat(&self, id: i64) -> QueueResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE queue_entries SET heartbeat_at = ?2 WHERE id = ?1 AND state = 'active'",
            params![id, Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    pub fn update_progress(&self, id: i64, progress: i64) -> QueueResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE queue_entries SET progress = ?2, heartbeat_at = ?3
             WHERE id = ?1 AND state = 'active'",
            params![id, progress.clamp(0, 100), Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    pub fn mark_completed(&self, id: i64, result: &serde_json::Value) -> QueueResult<()> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE queue_entries
             SET state = 'completed', progress = 100, finished_at = ?2, result = ?3
             WHERE id = ?1 AND state = 'active'",
            params![id, Utc::now().naive_utc(), serde_json::to_string(result)?],
        )?;
        if changed == 0 {
            return Err(self.state_failure(&conn, id)?);
        }
        self.trim(&conn, EntryState::Completed, self.keep_completed)?;
        Ok(())
    }

    /// Records a failed attempt. Entries with attempts left are parked as
    /// delayed with exponential backoff; exhausted entries become failed and
    /// are retained within the failed-retention budget.
    pub fn mark_failed(&self, id: i64, error: &str) -> QueueResult<FailureDisposition> {
        let conn = self.open()?;
        let entry = self.require_entry(&conn, id)?;
        if entry.state != EntryState::Active {
            return Err(QueueError::InvalidState {
                id,
                state: entry.state.to_string(),
            });
        }
        let now = Utc::now();
        if entry.attempts_made < entry.max_attempts {
            let delay_ms = entry.retry_delay_ms();
            let eligible = now + Duration::milliseconds(delay_ms as i64);
            conn.execute(
                "UPDATE queue_entries
                 SET state = 'delayed', eligible_at = ?2, last_error = ?3
                 WHERE id = ?1",
                params![id, eligible.naive_utc(), error],
            )?;
            Ok(FailureDisposition::Retry {
                attempt: entry.attempts_made,
                delay_ms,
            })
        } else {
            conn.execute(
                "UPDATE queue_entries
                 SET state = 'failed', finished_at = ?2, last_error = ?3
                 WHERE id = ?1",
                params![id, now.naive_utc(), error],
            )?;
            self.trim(&conn, EntryState::Failed, self.keep_failed)?;
            Ok(FailureDisposition::Exhausted {
                attempts: entry.attempts_made,
            })
        }
    }

    /// Active entries without a heartbeat inside the stall window go back to
    /// waiting; the attempt they burned stays counted. Entries that already
    /// used their attempt budget fail instead.
    pub fn requeue_stalled(&self, stall_window: Duration) -> QueueResult<Vec<QueueEntry>> {
        let conn = self.open()?;
        let cutoff = (Utc::now() - stall_window).naive_utc();
        let mut stmt = conn.prepare(
            "SELECT * FROM queue_entries WHERE state = 'active' AND heartbeat_at < ?1",
        )?;
        let stalled = stmt
            .query_map(params![cutoff], |row| QueueEntry::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        let now = Utc::now().naive_utc();
        for entry in &stalled {
            if entry.attempts_made < entry.max_attempts {
                conn.execute(
                    "UPDATE queue_entries SET state = 'waiting', heartbeat_at = NULL
                     WHERE id = ?1",
                    params![entry.id],
                )?;
            } else {
                conn.execute(
                    "UPDATE queue_entries
                     SET state = 'failed', finished_at = ?2, last_error = 'stalled'
                     WHERE id = ?1",
                    params![entry.id, now],
                )?;
            }
        }
        Ok(stalled)
    }

    /// Operator-initiated re-run of a failed entry.
    pub fn retry_entry(&self, id: i64) -> QueueResult<()> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE queue_entries
             SET state = 'waiting', attempts_made = 0, last_error = NULL,
                 finished_at = NULL, progress = 0
             WHERE id = ?1 AND state = 'failed'",
            params![id],
        )?;
        if changed == 0 {
            return Err(self.state_failure(&conn, id)?);
        }
        Ok(())
    }

    pub fn remove(&self, id: i64) -> QueueResult<()> {
        let conn = self.open()?;
        let changed = conn.execute("DELETE FROM queue_entries WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(QueueError::EntryNotFound { id });
        }
        Ok(())
    }

    /// Removes the pending (waiting or delayed) entry for a job, if any.
    /// Active entries are left alone.
    pub fn remove_pending_for_job(&self, job_id: &str) -> QueueResult<bool> {
        let conn = self.open()?;
        let changed = conn.execute(
            "DELETE FROM queue_entries
             WHERE job_id = ?1 AND state IN ('waiting', 'delayed')",
            params![job_id],
        )?;
        Ok(changed > 0)
    }

    pub fn get_entry(&self, id: i64) -> QueueResult<Option<QueueEntry>> {
        let conn = self.open()?;
        let entry = conn
            .query_row("SELECT * FROM queue_entries WHERE id = ?1", [id], |row| {
                QueueEntry::from_row(row)
            })
            .optional()?;
        Ok(entry)
    }

    pub fn counts(&self) -> QueueResult<QueueCounts> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM queue_entries GROUP BY state")?;
        let mut counts = QueueCounts::default();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })? {
            let (state, count) = row?;
            match state.as_str() {
                "waiting" => counts.waiting = count,
                "active" => counts.active = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                "delayed" => counts.delayed = count,
                _ => {}
            }
            counts.total += count;
        }
        Ok(counts)
    }

    pub fn active_entries(&self) -> QueueResult<Vec<QueueEntry>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM queue_entries WHERE state = 'active' ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| QueueEntry::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn failed_entries(&self, limit: usize) -> QueueResult<Vec<QueueEntry>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM queue_entries WHERE state = 'failed'
             ORDER BY finished_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| QueueEntry::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Purges terminal entries older than the given age.
    pub fn clean(&self, older_than: Duration) -> QueueResult<usize> {
        let conn = self.open()?;
        let cutoff = (Utc::now() - older_than).naive_utc();
        let removed = conn.execute(
            "DELETE FROM queue_entries
             WHERE state IN ('completed', 'failed') AND finished_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    pub fn pause(&self) -> QueueResult<()> {
        self.set_control("paused", "1")
    }

    pub fn resume(&self) -> QueueResult<()> {
        self.set_control("paused", "0")
    }

    pub fn is_paused(&self) -> QueueResult<bool> {
        let conn = self.open()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM queue_control WHERE key = 'paused'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.as_deref() == Some("1"))
    }

    fn set_control(&self, key: &str, value: &str) -> QueueResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO queue_control (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn trim(&self, conn: &Connection, state: EntryState, keep: usize) -> QueueResult<()> {
        conn.execute(
            "DELETE FROM queue_entries WHERE state = ?1 AND id NOT IN (
                 SELECT id FROM queue_entries WHERE state = ?1
                 ORDER BY finished_at DESC, id DESC LIMIT ?2
             )",
            params![state.as_str(), keep as i64],
        )?;
        Ok(())
    }

    fn require_entry(&self, conn: &Connection, id: i64) -> QueueResult<QueueEntry> {
        conn.query_row("SELECT * FROM queue_entries WHERE id = ?1", [id], |row| {
            QueueEntry::from_row(row)
        })
        .optional()?
        .ok_or(QueueError::EntryNotFound { id })
    }

    fn state_failure(&self, conn: &Connection, id: i64) -> QueueResult<QueueError> {
        match self.require_entry(conn, id) {
            Ok(entry) => Ok(QueueError::InvalidState {
                id,
                state: entry.state.to_string(),
            }),
            Err(err) => Ok(err),
        }
    }
}
