use std::path::Path;

use tempfile::TempDir;
use vodforge_core::{
    EnqueueOptions, EntryState, Environment, FailureDisposition, QueueError, Resolution,
    SqliteQueueStore, TranscodeRequest,
};

fn temp_store(dir: &Path) -> SqliteQueueStore {
    let store = SqliteQueueStore::builder()
        .path(dir.join("queue.sqlite"))
        .create_if_missing(true)
        .build()
        .expect("create store");
    store.initialize().expect("initialize store");
    store
}

fn payload(job_id: &str) -> TranscodeRequest {
    TranscodeRequest {
        job_id: job_id.into(),
        original_key: format!("uploads/{job_id}.mp4"),
        resolutions: vec![Resolution::P720],
        video_name: job_id.into(),
        environment: Environment::Production,
        callback_url: None,
    }
}

fn fast_retry(attempts: u32) -> EnqueueOptions {
    EnqueueOptions {
        attempts,
        backoff_base_ms: 0,
        ..EnqueueOptions::default()
    }
}

#[test]
fn priority_then_fifo_ordering() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.add(&payload("low-1"), 0, EnqueueOptions::default()).unwrap();
    store.add(&payload("high"), 5, EnqueueOptions::default()).unwrap();
    store.add(&payload("low-2"), 0, EnqueueOptions::default()).unwrap();

    let first = store.reserve_next().unwrap().unwrap();
    assert_eq!(first.job_id, "high");
    let second = store.reserve_next().unwrap().unwrap();
    assert_eq!(second.job_id, "low-1");
    let third = store.reserve_next().unwrap().unwrap();
    assert_eq!(third.job_id, "low-2");
    assert!(store.reserve_next().unwrap().is_none());
}

#[test]
fn reservation_counts_an_attempt() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.add(&payload("job"), 0, EnqueueOptions::default()).unwrap();
    let entry = store.reserve_next().unwrap().unwrap();
    assert_eq!(entry.state, EntryState::Active);
    assert_eq!(entry.attempts_made, 1);
    assert!(entry.processed_at.is_some());
    assert!(entry.heartbeat_at.is_some());
}

#[test]
fn failure_schedules_retry_until_exhaustion() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.add(&payload("job"), 0, fast_retry(3)).unwrap();

    // attempt 1
    let entry = store.reserve_next().unwrap().unwrap();
    let disposition = store.mark_failed(entry.id, "boom 1").unwrap();
    assert_eq!(
        disposition,
        FailureDisposition::Retry {
            attempt: 1,
            delay_ms: 0
        }
    );

    // attempt 2: delayed entry is due immediately with zero backoff
    let entry = store.reserve_next().unwrap().unwrap();
    assert_eq!(entry.attempts_made, 2);
    let disposition = store.mark_failed(entry.id, "boom 2").unwrap();
    assert!(matches!(disposition, FailureDisposition::Retry { .. }));

    // attempt 3 exhausts the budget
    let entry = store.reserve_next().unwrap().unwrap();
    assert_eq!(entry.attempts_made, 3);
    let disposition = store.mark_failed(entry.id, "boom 3").unwrap();
    assert_eq!(disposition, FailureDisposition::Exhausted { attempts: 3 });

    let failed = store.failed_entries(10).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].last_error.as_deref(), Some("boom 3"));
    assert!(store.reserve_next().unwrap().is_none());
}

#[test]
fn backoff_delays_eligibility() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store
        .add(
            &payload("job"),
            0,
            EnqueueOptions {
                attempts: 2,
                backoff_base_ms: 60_000,
                ..EnqueueOptions::default()
            },
        )
        .unwrap();
    let entry = store.reserve_next().unwrap().unwrap();
    store.mark_failed(entry.id, "boom").unwrap();

    // The delayed entry is a minute out, so nothing is eligible now.
    assert!(store.reserve_next().unwrap().is_none());
    let counts = store.counts().unwrap();
    assert_eq!(counts.delayed, 1);
}

#[test]
fn completion_stores_result_and_trims() {
    let dir = TempDir::new().unwrap();
    let store = SqliteQueueStore::builder()
        .path(dir.path().join("queue.sqlite"))
        .retention(2, 5)
        .build()
        .unwrap();
    store.initialize().unwrap();

    for n in 0..4 {
        store
            .add(&payload(&format!("job-{n}")), 0, EnqueueOptions::default())
            .unwrap();
        let entry = store.reserve_next().unwrap().unwrap();
        store
            .mark_completed(entry.id, &serde_json::json!({"n": n}))
            .unwrap();
    }
    let counts = store.counts().unwrap();
    assert_eq!(counts.completed, 2);
}

#[test]
fn stalled_entries_return_to_waiting() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.add(&payload("job"), 0, EnqueueOptions::default()).unwrap();
    let entry = store.reserve_next().unwrap().unwrap();

    // A generous window sees a live heartbeat: nothing stalls.
    assert!(store
        .requeue_stalled(chrono::Duration::seconds(60))
        .unwrap()
        .is_empty());

    // A negative window makes every heartbeat stale.
    let stalled = store
        .requeue_stalled(chrono::Duration::seconds(-60))
        .unwrap();
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].id, entry.id);
    let entry = store.get_entry(entry.id).unwrap().unwrap();
    assert_eq!(entry.state, EntryState::Waiting);
    // the burned attempt stays counted
    assert_eq!(entry.attempts_made, 1);
}

#[test]
fn operator_retry_and_remove() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.add(&payload("job"), 0, fast_retry(1)).unwrap();
    let entry = store.reserve_next().unwrap().unwrap();
    store.mark_failed(entry.id, "boom").unwrap();

    store.retry_entry(entry.id).unwrap();
    let retried = store.get_entry(entry.id).unwrap().unwrap();
    assert_eq!(retried.state, EntryState::Waiting);
    assert_eq!(retried.attempts_made, 0);
    assert!(retried.last_error.is_none());

    store.remove(entry.id).unwrap();
    assert!(store.get_entry(entry.id).unwrap().is_none());
    assert!(matches!(
        store.remove(entry.id),
        Err(QueueError::EntryNotFound { .. })
    ));
}

#[test]
fn pending_removal_skips_active_entries() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.add(&payload("waiting-job"), 0, EnqueueOptions::default()).unwrap();
    store.add(&payload("active-job"), 5, EnqueueOptions::default()).unwrap();
    let active = store.reserve_next().unwrap().unwrap();
    assert_eq!(active.job_id, "active-job");

    assert!(store.remove_pending_for_job("waiting-job").unwrap());
    assert!(!store.remove_pending_for_job("active-job").unwrap());
    let counts = store.counts().unwrap();
    assert_eq!(counts.active, 1);
    assert_eq!(counts.waiting, 0);
}

#[test]
fn pause_resume_and_clean() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    assert!(!store.is_paused().unwrap());
    store.pause().unwrap();
    assert!(store.is_paused().unwrap());
    store.resume().unwrap();
    assert!(!store.is_paused().unwrap());

    store.add(&payload("job"), 0, fast_retry(1)).unwrap();
    let entry = store.reserve_next().unwrap().unwrap();
    store.mark_failed(entry.id, "boom").unwrap();
    // a negative age purges anything already finished
    let removed = store.clean(chrono::Duration::seconds(-1)).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.counts().unwrap().total, 0);
}

#[test]
fn progress_touches_heartbeat() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.add(&payload("job"), 0, EnqueueOptions::default()).unwrap();
    let entry = store.reserve_next().unwrap().unwrap();
    store.update_progress(entry.id, 42).unwrap();
    let entry = store.get_entry(entry.id).unwrap().unwrap();
    assert_eq!(entry.progress, 42);
    assert!(entry.heartbeat_at.is_some());
}
