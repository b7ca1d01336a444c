mod common;

use common::{fixture, seed_source, StubEncoder};
use vodforge_core::{
    Environment, JobStatus, Resolution, ServiceError, SubmitRequest, ALL_RESOLUTIONS,
};

fn request(key: &str) -> SubmitRequest {
    SubmitRequest {
        original_key: key.into(),
        ..SubmitRequest::default()
    }
}

#[tokio::test]
async fn submit_defaults_and_environment_derivation() {
    let fx = fixture(StubEncoder::new(1920, 1080));
    seed_source(&fx, "uploads/My_Video.mp4");
    let service = fx.services.job_service();

    let receipt = service
        .submit(SubmitRequest {
            callback_url: Some("https://stage.example.com/cb".into()),
            ..request("uploads/My_Video.mp4")
        })
        .await
        .unwrap();

    assert_eq!(receipt.video_name, "My_Video");
    assert_eq!(receipt.environment, Environment::Staging);
    assert_eq!(receipt.resolutions, ALL_RESOLUTIONS.to_vec());
    assert_eq!(receipt.status, JobStatus::Queued);

    let job = service.get_job(&receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.environment, Environment::Staging);

    let stats = service.queue_stats().unwrap();
    assert_eq!(stats.waiting, 1);
}

#[tokio::test]
async fn submit_production_without_stage_marker() {
    let fx = fixture(StubEncoder::new(1920, 1080));
    seed_source(&fx, "uploads/a.mp4");
    let receipt = fx
        .services
        .job_service()
        .submit(SubmitRequest {
            callback_url: Some("https://app.example.com/cb".into()),
            ..request("uploads/a.mp4")
        })
        .await
        .unwrap();
    assert_eq!(receipt.environment, Environment::Production);
}

#[tokio::test]
async fn submit_validation_failures() {
    let fx = fixture(StubEncoder::new(1920, 1080));
    seed_source(&fx, "uploads/a.mp4");
    let service = fx.services.job_service();

    let err = service.submit(request("")).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(message) if message == "key is required"));

    let err = service
        .submit(SubmitRequest {
            video_name: Some("bad name!".into()),
            ..request("uploads/a.mp4")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(message)
        if message == "videoName must contain only alphanumeric characters, hyphens, and underscores"));

    let err = service
        .submit(SubmitRequest {
            resolutions: Some(vec!["999p".into()]),
            ..request("uploads/a.mp4")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(message) if message.contains("999p")));

    let err = service
        .submit(SubmitRequest {
            callback_url: Some("ftp://example.com/cb".into()),
            ..request("uploads/a.mp4")
        })
        .await
        .unwrap_err();
    assert!(
        matches!(err, ServiceError::Validation(message) if message.contains("http or https"))
    );
}

#[tokio::test]
async fn submit_rejects_missing_source() {
    let fx = fixture(StubEncoder::new(1920, 1080));
    let err = fx
        .services
        .job_service()
        .submit(request("uploads/ghost.mp4"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SourceMissing { key } if key == "uploads/ghost.mp4"));
}

#[tokio::test]
async fn cancel_only_touches_queued_jobs() {
    let fx = fixture(StubEncoder::new(1920, 1080));
    seed_source(&fx, "uploads/a.mp4");
    let service = fx.services.job_service();

    let receipt = service.submit(request("uploads/a.mp4")).await.unwrap();
    service.cancel(&receipt.job_id).unwrap();

    let job = service.get_job(&receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("cancelled by user"));
    assert_eq!(service.queue_stats().unwrap().waiting, 0);

    // a processing job refuses cancellation
    let receipt = service.submit(request("uploads/a.mp4")).await.unwrap();
    fx.services
        .job_store
        .update_status(&receipt.job_id, JobStatus::Processing)
        .unwrap();
    let err = service.cancel(&receipt.job_id).unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(message)
        if message == "only queued jobs can be cancelled"));

    let err = service.cancel("no-such-job").unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
}

#[tokio::test]
async fn retry_requeues_failed_jobs_only() {
    let fx = fixture(StubEncoder::new(1920, 1080));
    seed_source(&fx, "uploads/a.mp4");
    let service = fx.services.job_service();

    let receipt = service
        .submit(SubmitRequest {
            resolutions: Some(vec!["720p".into()]),
            priority: Some(3),
            ..request("uploads/a.mp4")
        })
        .await
        .unwrap();

    let err = service.retry(&receipt.job_id).unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    service.cancel(&receipt.job_id).unwrap();
    service.retry(&receipt.job_id).unwrap();

    let job = service.get_job(&receipt.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.progress, 0);
    assert!(job.error_message.is_none());

    let stats = service.queue_stats().unwrap();
    assert_eq!(stats.waiting, 1);
}

#[tokio::test]
async fn list_jobs_paginates_and_filters() {
    let fx = fixture(StubEncoder::new(1920, 1080));
    let service = fx.services.job_service();
    for n in 0..5 {
        seed_source(&fx, &format!("uploads/v{n}.mp4"));
        service.submit(request(&format!("uploads/v{n}.mp4"))).await.unwrap();
    }

    assert_eq!(service.list_jobs(None, 1, 3).unwrap().len(), 3);
    assert_eq!(service.list_jobs(None, 2, 3).unwrap().len(), 2);
    assert_eq!(
        service
            .list_jobs(Some(JobStatus::Queued), 1, 100)
            .unwrap()
            .len(),
        5
    );
    assert!(service
        .list_jobs(Some(JobStatus::Completed), 1, 100)
        .unwrap()
        .is_empty());

    let counts = service.counts().unwrap();
    assert_eq!(counts.queued, 5);
    assert_eq!(counts.total, 5);
}

#[tokio::test]
async fn delete_job_removes_record_and_scratch() {
    let fx = fixture(StubEncoder::new(1920, 1080));
    seed_source(&fx, "uploads/a.mp4");
    let service = fx.services.job_service();

    let receipt = service.submit(request("uploads/a.mp4")).await.unwrap();
    let scratch = fx.services.config.scratch_root().join(&receipt.job_id);
    std::fs::create_dir_all(&scratch).unwrap();
    std::fs::write(scratch.join("leftover.ts"), b"x").unwrap();

    let err = service.delete_job(&receipt.job_id).unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    service.cancel(&receipt.job_id).unwrap();
    service.delete_job(&receipt.job_id).unwrap();
    assert!(matches!(
        service.get_job(&receipt.job_id),
        Err(ServiceError::NotFound { .. })
    ));
    assert!(!scratch.exists());
}

#[tokio::test]
async fn queue_pause_resume_via_service() {
    let fx = fixture(StubEncoder::new(1920, 1080));
    let service = fx.services.job_service();
    assert!(!service.is_paused().unwrap());
    service.pause().unwrap();
    assert!(service.is_paused().unwrap());
    service.resume().unwrap();
    assert!(!service.is_paused().unwrap());
}

#[tokio::test]
async fn dedupe_preserves_first_occurrence_order() {
    let fx = fixture(StubEncoder::new(1920, 1080));
    seed_source(&fx, "uploads/a.mp4");
    let receipt = fx
        .services
        .job_service()
        .submit(SubmitRequest {
            resolutions: Some(vec!["480p".into(), "1080p".into(), "480p".into()]),
            ..request("uploads/a.mp4")
        })
        .await
        .unwrap();
    assert_eq!(receipt.resolutions, vec![Resolution::P480, Resolution::P1080]);
}
