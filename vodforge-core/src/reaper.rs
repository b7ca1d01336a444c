use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::checkpoint::{CheckpointStore, Stage};
use crate::config::VodforgeConfig;
use crate::queue::SqliteQueueStore;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    pub removed_dirs: usize,
    pub freed_bytes: u64,
    pub queue_entries_removed: usize,
}

/// Hourly janitor for local scratch space and retained queue entries.
/// Completed job directories go after one hour, failed ones after a day,
/// directories without a checkpoint on sight.
pub struct Reaper {
    scratch_root: PathBuf,
    queue: SqliteQueueStore,
    sweep_interval: Duration,
    completed_retention: chrono::Duration,
    failed_retention: chrono::Duration,
    queue_retention: chrono::Duration,
}

impl Reaper {
    pub fn new(config: &VodforgeConfig, queue: SqliteQueueStore) -> Self {
        Self {
            scratch_root: config.scratch_root(),
            queue,
            sweep_interval: Duration::from_secs(config.limits.reaper_interval_seconds),
            completed_retention: chrono::Duration::hours(
                config.limits.completed_scratch_retention_hours,
            ),
            failed_retention: chrono::Duration::hours(config.limits.failed_scratch_retention_hours),
            queue_retention: chrono::Duration::hours(config.limits.queue_retention_hours),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(self.sweep_interval);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tick.tick() => {
                    match self.sweep().await {
                        Ok(report) => info!(
                            removed = report.removed_dirs,
                            freed_bytes = report.freed_bytes,
                            queue_removed = report.queue_entries_removed,
                            "reaper sweep finished"
                        ),
                        Err(err) => warn!(error = %err, "reaper sweep failed"),
                    }
                }
            }
        }
    }

    pub async fn sweep(&self) -> std::io::Result<SweepReport> {
        let mut report = SweepReport::default();
        if self.scratch_root.exists() {
            let mut entries = tokio::fs::read_dir(&self.scratch_root).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let dir = entry.path();
                if self.should_remove(&dir).await {
                    let size = directory_size(&dir);
                    match tokio::fs::remove_dir_all(&dir).await {
                        Ok(()) => {
                            report.removed_dirs += 1;
                            report.freed_bytes += size;
                        }
                        Err(err) => {
                            warn!(path = %dir.display(), error = %err, "failed to remove scratch directory")
                        }
                    }
                }
            }
        }
        match self.queue.clean(self.queue_retention) {
            Ok(removed) => report.queue_entries_removed = removed,
            Err(err) => warn!(error = %err, "queue cleaning failed"),
        }
        Ok(report)
    }

    async fn should_remove(&self, dir: &std::path::Path) -> bool {
        let store = CheckpointStore::new(dir);
        match store.load().await {
            // Orphan directories have no checkpoint at all.
            Ok(None) => true,
            Ok(Some(checkpoint)) => {
                let age = Utc::now() - checkpoint.updated_at;
                match checkpoint.stage {
                    Stage::Completed => age > self.completed_retention,
                    Stage::Failed => age > self.failed_retention,
                    _ => false,
                }
            }
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "unreadable checkpoint, leaving directory");
                false
            }
        }
    }
}

fn directory_size(dir: &std::path::Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}
