use tempfile::TempDir;
use vodforge_core::{CheckpointStore, JobCheckpoint, Resolution, Stage, UploadedFile};

#[tokio::test]
async fn load_or_create_writes_initial_state() {
    let dir = TempDir::new().unwrap();
    let job_dir = dir.path().join("job-1");
    let store = CheckpointStore::new(&job_dir);

    assert!(store.load().await.unwrap().is_none());
    let checkpoint = store.load_or_create("job-1").await.unwrap();
    assert_eq!(checkpoint.stage, Stage::Initialized);
    assert!(store.path().exists());

    // a second call reads the persisted file rather than recreating it
    let again = store.load_or_create("job-1").await.unwrap();
    assert_eq!(again, checkpoint);
}

#[tokio::test]
async fn save_round_trips_full_state() {
    let dir = TempDir::new().unwrap();
    let job_dir = dir.path().join("job-1");
    let store = CheckpointStore::new(&job_dir);

    let mut checkpoint = JobCheckpoint::new("job-1");
    checkpoint.mark_stage(Stage::Transcoded);
    checkpoint.valid_resolutions = vec![Resolution::P720, Resolution::P480];
    checkpoint.add_completed_resolution(Resolution::P720);
    checkpoint.add_uploaded_file(UploadedFile {
        name: "index-.m3u8".into(),
        key: "a/hls_720p/index-.m3u8".into(),
        size: 215,
    });
    checkpoint.downloaded_file = Some(job_dir.join("a.mp4"));
    store.save(&checkpoint).await.unwrap();

    let loaded = store.load().await.unwrap().unwrap();
    assert_eq!(loaded, checkpoint);
    assert!(loaded.is_stage_completed(Stage::ThumbnailsGenerated));
    assert!(loaded.is_resolution_completed(Resolution::P720));
    assert!(!loaded.is_resolution_completed(Resolution::P480));
    assert_eq!(loaded.total_uploaded_size(), 215);
}

#[tokio::test]
async fn save_leaves_no_temp_file_behind() {
    let dir = TempDir::new().unwrap();
    let job_dir = dir.path().join("job-1");
    let store = CheckpointStore::new(&job_dir);
    store.save(&JobCheckpoint::new("job-1")).await.unwrap();

    let names: Vec<String> = std::fs::read_dir(&job_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["job_state.json".to_string()]);
}

#[tokio::test]
async fn failed_state_preserves_progress_fields() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path().join("job-1"));

    let mut checkpoint = JobCheckpoint::new("job-1");
    checkpoint.add_completed_resolution(Resolution::P720);
    checkpoint.mark_failed("upload exploded");
    store.save(&checkpoint).await.unwrap();

    let loaded = store.load().await.unwrap().unwrap();
    assert_eq!(loaded.stage, Stage::Failed);
    assert_eq!(loaded.error.as_deref(), Some("upload exploded"));
    // resumption data survives the failure marker
    assert!(loaded.is_resolution_completed(Resolution::P720));
}
