mod common;

use chrono::{Duration, Utc};
use common::{fixture, StubEncoder};
use vodforge_core::{CheckpointStore, JobCheckpoint, Reaper, Stage};

async fn write_checkpoint(dir: &std::path::Path, job_id: &str, stage: Stage, age: Duration) {
    let job_dir = dir.join(job_id);
    std::fs::create_dir_all(&job_dir).unwrap();
    std::fs::write(job_dir.join("leftover.ts"), b"segment bytes").unwrap();
    let mut checkpoint = JobCheckpoint::new(job_id);
    checkpoint.stage = stage;
    checkpoint.updated_at = Utc::now() - age;
    CheckpointStore::new(&job_dir)
        .save(&checkpoint)
        .await
        .unwrap();
}

#[tokio::test]
async fn sweep_applies_split_retention_policy() {
    let fx = fixture(StubEncoder::new(1280, 720));
    let scratch = fx.services.config.scratch_root();

    write_checkpoint(&scratch, "completed-old", Stage::Completed, Duration::hours(2)).await;
    write_checkpoint(&scratch, "completed-fresh", Stage::Completed, Duration::minutes(10)).await;
    write_checkpoint(&scratch, "failed-old", Stage::Failed, Duration::hours(25)).await;
    write_checkpoint(&scratch, "failed-fresh", Stage::Failed, Duration::hours(2)).await;
    write_checkpoint(&scratch, "in-flight", Stage::Transcoded, Duration::hours(48)).await;

    // orphan: a directory with no checkpoint at all
    let orphan = scratch.join("orphan");
    std::fs::create_dir_all(&orphan).unwrap();
    std::fs::write(orphan.join("junk.bin"), b"junk").unwrap();

    let reaper = Reaper::new(&fx.services.config, fx.services.queue.clone());
    let report = reaper.sweep().await.unwrap();

    assert_eq!(report.removed_dirs, 3);
    assert!(report.freed_bytes > 0);
    assert!(!scratch.join("completed-old").exists());
    assert!(scratch.join("completed-fresh").exists());
    assert!(!scratch.join("failed-old").exists());
    assert!(scratch.join("failed-fresh").exists());
    assert!(scratch.join("in-flight").exists());
    assert!(!orphan.exists());
}

#[tokio::test]
async fn sweep_on_empty_scratch_is_a_noop() {
    let fx = fixture(StubEncoder::new(1280, 720));
    let reaper = Reaper::new(&fx.services.config, fx.services.queue.clone());
    let report = reaper.sweep().await.unwrap();
    assert_eq!(report.removed_dirs, 0);
    assert_eq!(report.freed_bytes, 0);
}
