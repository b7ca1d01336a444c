use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::sqlite::configure_connection;

use super::error::{JobStoreError, JobStoreResult};
use super::models::{Job, JobCounts, JobLog, JobStatus, LogLevel};

const JOBS_SCHEMA: &str = include_str!("../../../sql/jobs.sql");

#[derive(Debug, Clone)]
pub struct SqliteJobStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteJobStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteJobStoreBuilder {
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

    pub fn build(self) -> JobStoreResult<SqliteJobStore> {
        let path = self.path.ok_or(JobStoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteJobStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteJobStore {
    pub fn builder() -> SqliteJobStoreBuilder {
        SqliteJobStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> JobStoreResult<Self> {
        SqliteJobStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> JobStoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            JobStoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| JobStoreError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> JobStoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(JOBS_SCHEMA)?;
        Ok(())
    }

    pub fn create_job(&self, job: &Job) -> JobStoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO jobs (
                job_id, original_key, status, progress, resolutions, video_name,
                environment, callback_url, priority
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &job.job_id,
                &job.original_key,
                job.status.as_str(),
                job.progress,
                Job::serialize_resolutions(&job.resolutions),
                &job.video_name,
                job.environment.as_str(),
                &job.callback_url,
                job.priority,
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> JobStoreResult<Option<Job>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE job_id = ?1")?;
        let job = stmt
            .query_row([job_id], |row| Job::from_row(row))
            .optional()?;
        Ok(job)
    }

    pub fn get_job_with_logs(&self, job_id: &str) -> JobStoreResult<Option<(Job, Vec<JobLog>)>> {
        let Some(job) = self.get_job(job_id)? else {
            return Ok(None);
        };
        let logs = self.get_logs(job_id)?;
        Ok(Some((job, logs)))
    }

    /// Applies a status transition from the legal set; anything else fails
    /// loudly with `InvalidTransition`. The conditional UPDATE is a single
    /// atomic statement, so concurrent writers cannot race a transition.
    pub fn update_status(&self, job_id: &str, to: JobStatus) -> JobStoreResult<()> {
        let conn = self.open()?;
        let now = Utc::now().naive_utc();
        let changed = match to {
            JobStatus::Processing => conn.execute(
                "UPDATE jobs SET status = 'processing', started_at = ?2
                 WHERE job_id = ?1 AND status = 'queued'",
                params![job_id, now],
            )?,
            JobStatus::Completed => conn.execute(
                "UPDATE jobs SET status = 'completed', progress = 100, completed_at = ?2
                 WHERE job_id = ?1 AND status = 'processing'",
                params![job_id, now],
            )?,
            JobStatus::Failed => conn.execute(
                "UPDATE jobs SET status = 'failed', completed_at = ?2
                 WHERE job_id = ?1 AND status IN ('processing', 'queued')",
                params![job_id, now],
            )?,
            JobStatus::Queued => conn.execute(
                "UPDATE jobs SET status = 'queued', progress = 0, error_message = NULL,
                        output_key = NULL, started_at = NULL, completed_at = NULL
                 WHERE job_id = ?1 AND status = 'failed'",
                params![job_id],
            )?,
        };
        if changed == 0 {
            return Err(self.transition_failure(job_id, to)?);
        }
        Ok(())
    }

    pub fn update_progress(&self, job_id: &str, progress: i64) -> JobStoreResult<()> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE jobs SET progress = ?2 WHERE job_id = ?1",
            params![job_id, progress.clamp(0, 100)],
        )?;
        if changed == 0 {
            return Err(JobStoreError::NotFound {
                job_id: job_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_error(&self, job_id: &str, message: &str) -> JobStoreResult<()> {
        let conn = self.open()?;
        let now = Utc::now().naive_utc();
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error_message = ?2, completed_at = ?3
             WHERE job_id = ?1 AND status IN ('processing', 'queued')",
            params![job_id, message, now],
        )?;
        if changed == 0 {
            return Err(self.transition_failure(job_id, JobStatus::Failed)?);
        }
        Ok(())
    }

    pub fn complete_job(
        &self,
        job_id: &str,
        output_key: &str,
        file_size: i64,
        duration_seconds: Option<f64>,
    ) -> JobStoreResult<()> {
        let conn = self.open()?;
        let now = Utc::now().naive_utc();
        let changed = conn.execute(
            "UPDATE jobs SET status = 'completed', progress = 100, output_key = ?2,
                    file_size = ?3, duration_seconds = ?4, completed_at = ?5
             WHERE job_id = ?1 AND status = 'processing'",
            params![job_id, output_key, file_size, duration_seconds, now],
        )?;
        if changed == 0 {
            return Err(self.transition_failure(job_id, JobStatus::Completed)?);
        }
        Ok(())
    }

    pub fn list(&self, limit: usize, offset: usize) -> JobStoreResult<Vec<Job>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2")?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                Job::from_row(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_by_status(&self, status: JobStatus) -> JobStoreResult<Vec<Job>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at DESC")?;
        let rows = stmt
            .query_map([status.as_str()], |row| Job::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn counts(&self) -> JobStoreResult<JobCounts> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let mut counts = JobCounts::default();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })? {
            let (status, count) = row?;
            match status.as_str() {
                "queued" => counts.queued = count,
                "processing" => counts.processing = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                _ => {}
            }
            counts.total += count;
        }
        Ok(counts)
    }

    pub fn recent(&self, limit: usize) -> JobStoreResult<Vec<Job>> {
        self.list(limit, 0)
    }

    pub fn add_log(
        &self,
        job_id: &str,
        level: LogLevel,
        message: &str,
        stage: Option<&str>,
        details: Option<&serde_json::Value>,
    ) -> JobStoreResult<()> {
        let conn = self.open()?;
        let details = details.map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO job_logs (job_id, level, message, stage, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job_id, level.as_str(), message, stage, details],
        )?;
        Ok(())
    }

    pub fn get_logs(&self, job_id: &str) -> JobStoreResult<Vec<JobLog>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM job_logs WHERE job_id = ?1 ORDER BY created_at, id")?;
        let rows = stmt
            .query_map([job_id], |row| JobLog::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_recent_logs(&self, limit: usize) -> JobStoreResult<Vec<JobLog>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM job_logs ORDER BY created_at DESC, id DESC LIMIT ?1")?;
        let rows = stmt
            .query_map([limit as i64], |row| JobLog::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_error_logs(&self, limit: usize) -> JobStoreResult<Vec<JobLog>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM job_logs WHERE level = 'error'
             ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| JobLog::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Deletes a terminal job and its logs. Non-terminal jobs are refused.
    pub fn delete_job(&self, job_id: &str) -> JobStoreResult<()> {
        let job = self.get_job(job_id)?.ok_or_else(|| JobStoreError::NotFound {
            job_id: job_id.to_string(),
        })?;
        if !job.status.terminal() {
            return Err(JobStoreError::InvalidStatus {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
            });
        }
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM job_logs WHERE job_id = ?1", [job_id])?;
        tx.execute("DELETE FROM jobs WHERE job_id = ?1", [job_id])?;
        tx.commit()?;
        Ok(())
    }

    fn transition_failure(&self, job_id: &str, to: JobStatus) -> JobStoreResult<JobStoreError> {
        match self.get_job(job_id)? {
            None => Ok(JobStoreError::NotFound {
                job_id: job_id.to_string(),
            }),
            Some(job) => Ok(JobStoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status.to_string(),
                to: to.to_string(),
            }),
        }
    }
}
