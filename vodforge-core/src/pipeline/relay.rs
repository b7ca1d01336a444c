use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::job::{JobStoreError, LogLevel, SqliteJobStore, JobStatus};
use crate::queue::{FailureDisposition, QueueEntry, QueueEvent};

use super::callback::CallbackClient;
use super::types::PipelineReport;

/// Consumes queue lifecycle events and projects them onto the job store,
/// keeping the queue backend decoupled from job persistence. Terminal
/// failures also trigger the failure callback, exactly once per exhaustion.
pub struct JobEventRelay {
    job_store: SqliteJobStore,
    callbacks: CallbackClient,
}

impl JobEventRelay {
    pub fn new(job_store: SqliteJobStore, callbacks: CallbackClient) -> Self {
        Self {
            job_store,
            callbacks,
        }
    }

    pub async fn run(self, mut events: UnboundedReceiver<QueueEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event).await;
        }
        debug!("job event relay channel closed");
    }

    async fn apply(&self, event: QueueEvent) {
        match event {
            QueueEvent::Active { entry } => {
                match self.job_store.update_status(&entry.job_id, JobStatus::Processing) {
                    Ok(()) => {}
                    // A retried attempt finds the job already processing.
                    Err(JobStoreError::InvalidTransition { from, .. }) if from == "processing" => {}
                    Err(err) => {
                        warn!(job_id = %entry.job_id, error = %err, "failed to mark job processing")
                    }
                }
            }
            QueueEvent::Progress { job_id, progress, .. } => {
                if let Err(err) = self.job_store.update_progress(&job_id, progress) {
                    warn!(job_id = %job_id, error = %err, "failed to record job progress");
                }
            }
            QueueEvent::Completed { entry, result } => {
                self.finalize_completed(&entry, result);
            }
            QueueEvent::Failed {
                entry,
                error,
                disposition,
            } => match disposition {
                FailureDisposition::Retry { attempt, delay_ms } => {
                    self.log(
                        &entry.job_id,
                        LogLevel::Warn,
                        &format!("attempt {attempt} failed, retrying in {delay_ms}ms: {error}"),
                    );
                }
                FailureDisposition::Exhausted { attempts } => {
                    self.finalize_failed(&entry, &error, attempts).await;
                }
            },
            QueueEvent::Stalled { entry } => {
                self.log(
                    &entry.job_id,
                    LogLevel::Warn,
                    "worker heartbeat lost, entry returned to queue",
                );
                if entry.attempts_made >= entry.max_attempts {
                    self.finalize_failed(&entry, "stalled", entry.attempts_made).await;
                }
            }
        }
    }

    fn finalize_completed(&self, entry: &QueueEntry, result: serde_json::Value) {
        let report: PipelineReport = match serde_json::from_value(result) {
            Ok(report) => report,
            Err(err) => {
                warn!(job_id = %entry.job_id, error = %err, "unparseable pipeline result");
                return;
            }
        };
        match self.job_store.complete_job(
            &entry.job_id,
            &report.output_key,
            report.total_size as i64,
            report.duration_seconds,
        ) {
            Ok(()) => {
                info!(job_id = %entry.job_id, output_key = %report.output_key, "job completed");
            }
            Err(JobStoreError::InvalidTransition { from, .. }) if from == "completed" => {}
            Err(err) => {
                warn!(job_id = %entry.job_id, error = %err, "failed to finalize job record")
            }
        }
    }

    async fn finalize_failed(&self, entry: &QueueEntry, error: &str, attempts: u32) {
        match self.job_store.set_error(&entry.job_id, error) {
            Ok(()) => {}
            Err(JobStoreError::InvalidTransition { from, .. }) if from == "failed" => {}
            Err(err) => {
                warn!(job_id = %entry.job_id, error = %err, "failed to record job failure");
            }
        }
        self.log(
            &entry.job_id,
            LogLevel::Error,
            &format!("job failed after {attempts} attempts: {error}"),
        );
        let payload = &entry.payload;
        if let Err(err) = self
            .callbacks
            .send_failure(
                payload.callback_url.as_deref(),
                &entry.job_id,
                &payload.original_key,
                payload.environment,
                error,
            )
            .await
        {
            warn!(job_id = %entry.job_id, error = %err, "failure callback not delivered");
        }
    }

    fn log(&self, job_id: &str, level: LogLevel, message: &str) {
        if let Err(err) = self.job_store.add_log(job_id, level, message, Some("queue"), None) {
            warn!(job_id, error = %err, "failed to append job log");
        }
    }
}
