use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::interval;
use tracing::{info, warn};

use super::error::QueueResult;
use super::models::{QueueEntry, QueueEvent, TranscodeRequest};
use super::store::SqliteQueueStore;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// The unit of work executed for each reserved entry. Implemented by the
/// transcoding pipeline; tests substitute stubs.
#[async_trait]
pub trait EntryHandler: Send + Sync + 'static {
    async fn handle(&self, entry: &ActiveEntry) -> Result<serde_json::Value, HandlerError>;
}

/// Handle given to the handler while its entry is active. Progress reports
/// touch the heartbeat, so a reporting job is never considered stalled.
#[derive(Clone)]
pub struct ActiveEntry {
    entry: QueueEntry,
    store: SqliteQueueStore,
    events: mpsc::UnboundedSender<QueueEvent>,
}

impl ActiveEntry {
    pub fn entry(&self) -> &QueueEntry {
        &self.entry
    }

    pub fn payload(&self) -> &TranscodeRequest {
        &self.entry.payload
    }

    pub fn progress(&self, progress: i64) {
        if let Err(err) = self.store.update_progress(self.entry.id, progress) {
            warn!(entry = self.entry.id, error = %err, "failed to persist queue progress");
        }
        let _ = self.events.send(QueueEvent::Progress {
            entry_id: self.entry.id,
            job_id: self.entry.job_id.clone(),
            progress,
        });
    }
}

#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub stall_check_interval: Duration,
    pub stall_window: chrono::Duration,
    pub clean_interval: Duration,
    pub clean_age: chrono::Duration,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(30),
            stall_check_interval: Duration::from_secs(30),
            stall_window: chrono::Duration::seconds(120),
            clean_interval: Duration::from_secs(3600),
            clean_age: chrono::Duration::hours(24),
        }
    }
}

/// Dispatcher bound to one queue store: reserves eligible entries up to the
/// configured concurrency, runs the handler, records the outcome, and emits
/// lifecycle events on the channel returned by `new`.
pub struct QueueWorker {
    store: SqliteQueueStore,
    handler: Arc<dyn EntryHandler>,
    events: mpsc::UnboundedSender<QueueEvent>,
    config: QueueWorkerConfig,
}

impl QueueWorker {
    pub fn new(
        store: SqliteQueueStore,
        handler: Arc<dyn EntryHandler>,
        config: QueueWorkerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<QueueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                handler,
                events: tx,
                config,
            },
            rx,
        )
    }

    pub fn events(&self) -> mpsc::UnboundedSender<QueueEvent> {
        self.events.clone()
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut poll = interval(self.config.poll_interval);
        let mut stall_check = interval(self.config.stall_check_interval);
        let mut clean_tick = interval(self.config.clean_interval);
        info!(concurrency = self.config.concurrency, "queue worker started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("queue worker received shutdown signal");
                    break;
                }
                _ = poll.tick() => {
                    match self.store.is_paused() {
                        Ok(true) => continue,
                        Ok(false) => self.dispatch_available(&semaphore),
                        Err(err) => warn!(error = %err, "failed to read queue pause state"),
                    }
                }
                _ = stall_check.tick() => {
                    self.handle_stalled();
                }
                _ = clean_tick.tick() => {
                    match self.store.clean(self.config.clean_age) {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "purged old queue entries"),
                        Err(err) => warn!(error = %err, "queue cleaning failed"),
                    }
                }
            }
        }

        // Drain: wait until every in-flight handler has returned its permit.
        let _ = semaphore.acquire_many(self.config.concurrency as u32).await;
        info!("queue worker drained");
        Ok(())
    }

    fn dispatch_available(&self, semaphore: &Arc<Semaphore>) {
        loop {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                return;
            };
            let entry = match self.store.reserve_next() {
                Ok(Some(entry)) => entry,
                Ok(None) => return,
                Err(err) => {
                    warn!(error = %err, "failed to reserve queue entry");
                    return;
                }
            };
            let store = self.store.clone();
            let handler = self.handler.clone();
            let events = self.events.clone();
            let heartbeat_interval = self.config.heartbeat_interval;
            tokio::spawn(async move {
                let _permit = permit;
                run_entry(store, handler, events, entry, heartbeat_interval).await;
            });
        }
    }

    fn handle_stalled(&self) {
        match self.store.requeue_stalled(self.config.stall_window) {
            Ok(stalled) => {
                for entry in stalled {
                    warn!(entry = entry.id, job_id = %entry.job_id, "queue entry stalled");
                    let _ = self.events.send(QueueEvent::Stalled { entry });
                }
            }
            Err(err) => warn!(error = %err, "stall check failed"),
        }
    }
}

async fn run_entry(
    store: SqliteQueueStore,
    handler: Arc<dyn EntryHandler>,
    events: mpsc::UnboundedSender<QueueEvent>,
    entry: QueueEntry,
    heartbeat_interval: Duration,
) {
    let _ = events.send(QueueEvent::Active {
        entry: entry.clone(),
    });

    let active = ActiveEntry {
        entry: entry.clone(),
        store: store.clone(),
        events: events.clone(),
    };

    let heartbeat_store = store.clone();
    let entry_id = entry.id;
    let heartbeat = async {
        let mut tick = interval(heartbeat_interval);
        tick.tick().await;
        loop {
            tick.tick().await;
            if let Err(err) = heartbeat_store.heartbeat(entry_id) {
                warn!(entry = entry_id, error = %err, "heartbeat write failed");
            }
        }
    };

    let outcome = tokio::select! {
        result = handler.handle(&active) => result,
        _ = heartbeat => unreachable!("heartbeat loop never returns"),
    };

    match outcome {
        Ok(result) => {
            if let Err(err) = store.mark_completed(entry_id, &result) {
                warn!(entry = entry_id, error = %err, "failed to record completion");
            }
            let _ = events.send(QueueEvent::Completed { entry, result });
        }
        Err(error) => {
            let message = error.to_string();
            match store.mark_failed(entry_id, &message) {
                Ok(disposition) => {
                    let _ = events.send(QueueEvent::Failed {
                        entry,
                        error: message,
                        disposition,
                    });
                }
                Err(err) => {
                    warn!(entry = entry_id, error = %err, "failed to record failure");
                }
            }
        }
    }
}
