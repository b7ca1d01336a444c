mod common;

use std::time::Duration;

use common::{fixture, output_exists, seed_source, wait_for, StubEncoder};
use tokio::sync::watch;
use vodforge_core::{
    EnqueueOptions, EntryState, Environment, Job, JobStatus, Resolution, SubmitRequest,
    TranscodeRequest,
};

const WAIT: Duration = Duration::from_secs(15);

fn job_is(fixture: &common::Fixture, job_id: &str, status: JobStatus) -> bool {
    fixture
        .services
        .job_store
        .get_job(job_id)
        .ok()
        .flatten()
        .map(|job| job.status == status)
        .unwrap_or(false)
}

fn fetch_job(fixture: &common::Fixture, job_id: &str) -> Job {
    fixture
        .services
        .job_store
        .get_job(job_id)
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn transcodes_all_valid_renditions_and_uploads_bundle() {
    let fx = fixture(StubEncoder::new(1280, 720));
    seed_source(&fx, "uploads/a.mp4");

    let receipt = fx
        .services
        .job_service()
        .submit(SubmitRequest {
            original_key: "uploads/a.mp4".into(),
            resolutions: Some(vec!["720p".into(), "480p".into(), "360p".into()]),
            ..SubmitRequest::default()
        })
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = fx.services.clone();
    let handle = tokio::spawn(async move { worker.run_worker(shutdown_rx).await });

    assert!(wait_for(|| job_is(&fx, &receipt.job_id, JobStatus::Completed), WAIT).await);
    let _ = shutdown_tx.send(true);
    handle.await.unwrap().unwrap();

    let job = fetch_job(&fx, &receipt.job_id);
    assert_eq!(job.progress, 100);
    assert_eq!(job.output_key.as_deref(), Some("a/index.m3u8"));
    assert_eq!(job.duration_seconds, Some(120.0));
    assert!(job.file_size.unwrap() > 0);

    // full bundle: master, three renditions with segments, two thumbnails
    assert!(output_exists(&fx, "a/index.m3u8"));
    for rendition in ["hls_720p", "hls_480p", "hls_360p"] {
        assert!(output_exists(&fx, &format!("a/{rendition}/index-.m3u8")));
        assert!(output_exists(&fx, &format!("a/{rendition}/index-00000.ts")));
    }
    assert!(output_exists(&fx, "a/a-00001.jpg"));
    assert!(output_exists(&fx, "a/a-00001.png"));

    // master playlist lists renditions in descending height order
    let master =
        std::fs::read_to_string(fx.object_root.join("output").join("a/index.m3u8")).unwrap();
    let lines: Vec<&str> = master.lines().collect();
    assert_eq!(lines[0], "#EXTM3U");
    assert_eq!(lines[2], "hls_720p/index-.m3u8");
    assert_eq!(lines[4], "hls_480p/index-.m3u8");
    assert_eq!(lines[6], "hls_360p/index-.m3u8");

    // scratch renditions were reclaimed as soon as each upload finished
    let scratch = fx.services.config.scratch_root().join(&receipt.job_id);
    assert!(!scratch.join("hls_720p").exists());
    assert!(!scratch.join("hls_480p").exists());
}

#[tokio::test]
async fn upscale_targets_are_silently_dropped() {
    let fx = fixture(StubEncoder::new(640, 360));
    seed_source(&fx, "uploads/small.mp4");

    let receipt = fx
        .services
        .job_service()
        .submit(SubmitRequest {
            original_key: "uploads/small.mp4".into(),
            resolutions: Some(vec!["1080p".into(), "240p".into()]),
            ..SubmitRequest::default()
        })
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = fx.services.clone();
    let handle = tokio::spawn(async move { worker.run_worker(shutdown_rx).await });
    assert!(wait_for(|| job_is(&fx, &receipt.job_id, JobStatus::Completed), WAIT).await);
    let _ = shutdown_tx.send(true);
    handle.await.unwrap().unwrap();

    assert!(output_exists(&fx, "small/hls_240p/index-.m3u8"));
    assert!(!output_exists(&fx, "small/hls_1080p/index-.m3u8"));
    assert_eq!(fx.encoder.encode_count(Resolution::P1080), 0);
    assert_eq!(fx.encoder.encode_count(Resolution::P240), 1);

    let master =
        std::fs::read_to_string(fx.object_root.join("output").join("small/index.m3u8")).unwrap();
    assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 1);
    assert!(master.contains("RESOLUTION=426x240"));
}

#[tokio::test]
async fn missing_source_exhausts_attempts_and_fails() {
    let fx = fixture(StubEncoder::new(1280, 720));
    // no seed_source: the download stage has nothing to fetch

    let job_id = "job-missing-source".to_string();
    let job = Job::new(&job_id, "uploads/ghost.mp4", "ghost", vec![Resolution::P720]);
    fx.services.job_store.create_job(&job).unwrap();
    fx.services
        .queue
        .add(
            &TranscodeRequest {
                job_id: job_id.clone(),
                original_key: "uploads/ghost.mp4".into(),
                resolutions: vec![Resolution::P720],
                video_name: "ghost".into(),
                environment: Environment::Production,
                callback_url: None,
            },
            0,
            EnqueueOptions {
                attempts: 3,
                backoff_base_ms: 0,
                ..EnqueueOptions::default()
            },
        )
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = fx.services.clone();
    let handle = tokio::spawn(async move { worker.run_worker(shutdown_rx).await });
    assert!(wait_for(|| job_is(&fx, &job_id, JobStatus::Failed), WAIT).await);
    let _ = shutdown_tx.send(true);
    handle.await.unwrap().unwrap();

    let job = fetch_job(&fx, &job_id);
    assert!(job.error_message.unwrap().contains("Download failed"));

    let failed = fx.services.queue.failed_entries(10).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts_made, 3);
    assert_eq!(failed[0].state, EntryState::Failed);

    // every attempt left a stage-annotated error log, plus one terminal entry
    let logs = fx.services.job_store.get_logs(&job_id).unwrap();
    let attempts = logs
        .iter()
        .filter(|log| log.message.starts_with("pipeline failed"))
        .count();
    assert_eq!(attempts, 3);
    assert!(logs
        .iter()
        .any(|log| log.message.contains("job failed after 3 attempts")));
}

#[tokio::test]
async fn resumes_after_mid_job_failure_without_reencoding() {
    let fx = fixture(StubEncoder::new(1280, 720));
    seed_source(&fx, "uploads/resume.mp4");
    // 720p succeeds, then 480p fails once; the retry must resume past 720p
    fx.encoder.fail_next(Resolution::P480, 1);

    let receipt = fx
        .services
        .job_service()
        .submit(SubmitRequest {
            original_key: "uploads/resume.mp4".into(),
            resolutions: Some(vec!["720p".into(), "480p".into()]),
            ..SubmitRequest::default()
        })
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = fx.services.clone();
    let handle = tokio::spawn(async move { worker.run_worker(shutdown_rx).await });
    assert!(wait_for(|| job_is(&fx, &receipt.job_id, JobStatus::Completed), WAIT).await);
    let _ = shutdown_tx.send(true);
    handle.await.unwrap().unwrap();

    // one 720p encode across both attempts, two 480p calls (failure + retry)
    assert_eq!(fx.encoder.encode_count(Resolution::P720), 1);
    assert_eq!(fx.encoder.encode_count(Resolution::P480), 2);

    assert!(output_exists(&fx, "resume/hls_720p/index-.m3u8"));
    assert!(output_exists(&fx, "resume/hls_480p/index-.m3u8"));
    assert!(output_exists(&fx, "resume/index.m3u8"));

    let entry = fx.services.queue.failed_entries(10).unwrap();
    assert!(entry.is_empty());
}

#[tokio::test]
async fn rerunning_a_completed_job_is_idempotent() {
    let fx = fixture(StubEncoder::new(1280, 720));
    seed_source(&fx, "uploads/idem.mp4");

    let receipt = fx
        .services
        .job_service()
        .submit(SubmitRequest {
            original_key: "uploads/idem.mp4".into(),
            resolutions: Some(vec!["720p".into()]),
            ..SubmitRequest::default()
        })
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = fx.services.clone();
    let handle = tokio::spawn(async move { worker.run_worker(shutdown_rx).await });
    assert!(wait_for(|| job_is(&fx, &receipt.job_id, JobStatus::Completed), WAIT).await);

    // a duplicate queue entry for the same job replays the checkpoint
    let payload = TranscodeRequest {
        job_id: receipt.job_id.clone(),
        original_key: "uploads/idem.mp4".into(),
        resolutions: vec![Resolution::P720],
        video_name: "idem".into(),
        environment: Environment::Production,
        callback_url: None,
    };
    let duplicate = fx
        .services
        .queue
        .add(&payload, 0, EnqueueOptions::default())
        .unwrap();
    assert!(
        wait_for(
            || {
                fx.services
                    .queue
                    .get_entry(duplicate)
                    .ok()
                    .flatten()
                    .map(|entry| entry.state == EntryState::Completed)
                    .unwrap_or(false)
            },
            WAIT
        )
        .await
    );
    let _ = shutdown_tx.send(true);
    handle.await.unwrap().unwrap();

    // no re-encode happened and the bucket still holds exactly one bundle
    assert_eq!(fx.encoder.encode_count(Resolution::P720), 1);
    let job = fetch_job(&fx, &receipt.job_id);
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn thumbnail_failure_is_non_fatal() {
    let mut encoder = StubEncoder::new(1280, 720);
    encoder.fail_thumbnails = true;
    let fx = fixture(encoder);
    seed_source(&fx, "uploads/nothumb.mp4");

    let receipt = fx
        .services
        .job_service()
        .submit(SubmitRequest {
            original_key: "uploads/nothumb.mp4".into(),
            resolutions: Some(vec!["720p".into()]),
            ..SubmitRequest::default()
        })
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = fx.services.clone();
    let handle = tokio::spawn(async move { worker.run_worker(shutdown_rx).await });
    assert!(wait_for(|| job_is(&fx, &receipt.job_id, JobStatus::Completed), WAIT).await);
    let _ = shutdown_tx.send(true);
    handle.await.unwrap().unwrap();

    assert!(output_exists(&fx, "nothumb/index.m3u8"));
    assert!(!output_exists(&fx, "nothumb/nothumb-00001.jpg"));

    let logs = fx.services.job_store.get_logs(&receipt.job_id).unwrap();
    assert!(logs
        .iter()
        .any(|log| log.message.contains("thumbnail generation failed")));
}
