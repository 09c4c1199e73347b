mod common;

use std::sync::Arc;
use std::time::Duration;

use tapecast_core::{JobError, JobRecord, JobRegistry, JobStatus, Pipeline, ReleaseSource};
use tempfile::{tempdir, TempDir};
use tokio::fs;
use tokio::sync::Notify;

use common::{
    build_pipeline, credential, file_url, release_with_tracks, track, FailingSource, FakeRenderer,
    FakeSource, FakeUploader,
};

async fn wait_for_status(registry: &JobRegistry, id: &str, status: JobStatus) -> JobRecord {
    for _ in 0..500 {
        let record = registry.snapshot(id).expect("job record exists");
        if record.status == status {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {id} never reached {status:?}");
}

async fn registry_with_source(source: Arc<dyn ReleaseSource>) -> (JobRegistry, TempDir) {
    let dir = tempdir().unwrap();
    let sources = dir.path().join("sources");
    fs::create_dir_all(&sources).await.unwrap();
    fs::write(sources.join("t1.mp3"), b"AUDIO").await.unwrap();
    let pipeline: Pipeline = build_pipeline(
        &dir.path().join("cache"),
        source,
        Arc::new(FakeRenderer::default()),
        Arc::new(FakeUploader::default()),
    );
    (JobRegistry::new(Arc::new(pipeline)), dir)
}

fn one_track_release(dir: &std::path::Path) -> tapecast_core::ReleaseMetadata {
    release_with_tracks(vec![track(
        1,
        "Jack Straw",
        &file_url(&dir.join("sources").join("t1.mp3")),
        "t1.mp3",
    )])
}

#[tokio::test]
async fn job_walks_pending_running_complete() {
    let gate = Arc::new(Notify::new());
    let dir = tempdir().unwrap();
    let sources = dir.path().join("sources");
    fs::create_dir_all(&sources).await.unwrap();
    fs::write(sources.join("t1.mp3"), b"AUDIO").await.unwrap();
    let source = Arc::new(FakeSource::gated(
        one_track_release(dir.path()),
        gate.clone(),
    ));
    let pipeline = build_pipeline(
        &dir.path().join("cache"),
        source,
        Arc::new(FakeRenderer::default()),
        Arc::new(FakeUploader::default()),
    );
    let registry = JobRegistry::new(Arc::new(pipeline));

    let id = registry.submit(
        "https://archive.org/details/gd77".to_string(),
        credential(),
    );
    assert_eq!(id.len(), 8);

    // The spawned task has not been polled yet.
    let record = registry.snapshot(&id).unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert!(record.report.is_none());

    // Once polled it advances to running and parks on the gated source.
    let record = wait_for_status(&registry, &id, JobStatus::Running).await;
    assert!(record.cause.is_none());

    gate.notify_one();
    let record = wait_for_status(&registry, &id, JobStatus::Complete).await;
    let report = record.report.expect("completed job carries a report");
    assert_eq!(report.video_ids, vec!["video-1"]);
    assert!(record.finished_at.is_some());
}

#[tokio::test]
async fn failed_scrape_marks_job_failed_with_cause() {
    let (registry, _dir) = registry_with_source(Arc::new(FailingSource)).await;

    let id = registry.submit(
        "https://archive.org/details/empty".to_string(),
        credential(),
    );
    let record = wait_for_status(&registry, &id, JobStatus::Failed).await;
    assert!(record.cause.unwrap().contains("no tracks"));
    assert!(record.report.is_none());
}

#[tokio::test]
async fn terminal_states_are_visible_to_late_pollers() {
    let dir = tempdir().unwrap();
    let sources = dir.path().join("sources");
    fs::create_dir_all(&sources).await.unwrap();
    fs::write(sources.join("t1.mp3"), b"AUDIO").await.unwrap();
    let source = Arc::new(FakeSource::new(one_track_release(dir.path())));
    let pipeline = build_pipeline(
        &dir.path().join("cache"),
        source,
        Arc::new(FakeRenderer::default()),
        Arc::new(FakeUploader::default()),
    );
    let registry = JobRegistry::new(Arc::new(pipeline));

    let id = registry.submit(
        "https://archive.org/details/gd77".to_string(),
        credential(),
    );
    wait_for_status(&registry, &id, JobStatus::Complete).await;

    // Long after completion the record still answers with the same state.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let record = registry.snapshot(&id).unwrap();
    assert_eq!(record.status, JobStatus::Complete);
}

#[tokio::test]
async fn publish_rejects_unknown_and_unfinished_jobs() {
    let (registry, _dir) = registry_with_source(Arc::new(FailingSource)).await;

    let err = registry.publish("deadbeef", &credential()).await.unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));

    let id = registry.submit(
        "https://archive.org/details/empty".to_string(),
        credential(),
    );
    wait_for_status(&registry, &id, JobStatus::Failed).await;
    let err = registry.publish(&id, &credential()).await.unwrap_err();
    assert!(matches!(err, JobError::NotComplete(_)));
}

#[tokio::test]
async fn publish_after_completion_reports_outcome() {
    let dir = tempdir().unwrap();
    let sources = dir.path().join("sources");
    fs::create_dir_all(&sources).await.unwrap();
    fs::write(sources.join("t1.mp3"), b"AUDIO").await.unwrap();
    let source = Arc::new(FakeSource::new(one_track_release(dir.path())));
    let uploader = Arc::new(FakeUploader::default());
    let pipeline = build_pipeline(
        &dir.path().join("cache"),
        source,
        Arc::new(FakeRenderer::default()),
        uploader.clone(),
    );
    let registry = JobRegistry::new(Arc::new(pipeline));

    let id = registry.submit(
        "https://archive.org/details/gd77".to_string(),
        credential(),
    );
    wait_for_status(&registry, &id, JobStatus::Complete).await;

    let outcome = registry.publish(&id, &credential()).await.unwrap();
    assert_eq!(outcome.videos_made_public, 1);
    assert!(outcome.playlist_updated);
    assert_eq!(
        uploader.published_videos.lock().unwrap().clone(),
        vec!["video-1"]
    );
}
