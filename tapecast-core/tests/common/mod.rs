#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use tapecast_core::{
    ArtifactStore, AudioFetcher, Credential, EncodeError, EncodeResult, Pipeline, ProbeReport,
    ProbeResult, Prober, ReleaseMetadata, ReleaseSource, Renderer, ScrapeError, ScrapeResult,
    TrackDescriptor, UploadError, UploadResult, Uploader,
};

pub fn track(number: u32, name: &str, audio_url: &str, filename: &str) -> TrackDescriptor {
    TrackDescriptor {
        number,
        name: name.to_string(),
        audio_url: audio_url.to_string(),
        filename: filename.to_string(),
    }
}

pub fn release_with_tracks(tracks: Vec<TrackDescriptor>) -> ReleaseMetadata {
    ReleaseMetadata {
        identifier: "gd77".to_string(),
        title: "1977-05-08 Barton Hall".to_string(),
        performer: "Grateful Dead".to_string(),
        venue: "Barton Hall".to_string(),
        date: "1977-05-08".to_string(),
        source_url: "https://archive.org/details/gd77".to_string(),
        tracks,
    }
}

pub fn credential() -> Credential {
    Credential::new("test-token")
}

/// Serves a canned release, optionally blocking until a gate is opened so
/// tests can observe a job mid-flight.
pub struct FakeSource {
    pub release: ReleaseMetadata,
    pub gate: Option<Arc<Notify>>,
}

impl FakeSource {
    pub fn new(release: ReleaseMetadata) -> Self {
        Self {
            release,
            gate: None,
        }
    }

    pub fn gated(release: ReleaseMetadata, gate: Arc<Notify>) -> Self {
        Self {
            release,
            gate: Some(gate),
        }
    }
}

#[async_trait]
impl ReleaseSource for FakeSource {
    async fn extract_metadata(&self, _source_url: &str) -> ScrapeResult<ReleaseMetadata> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.release.clone())
    }
}

pub struct FailingSource;

#[async_trait]
impl ReleaseSource for FailingSource {
    async fn extract_metadata(&self, source_url: &str) -> ScrapeResult<ReleaseMetadata> {
        Err(ScrapeError::NoTracks(source_url.to_string()))
    }
}

pub struct FakeProber;

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, _target: &str) -> ProbeResult<ProbeReport> {
        Ok(ProbeReport {
            duration_seconds: 60.0,
            has_video_stream: true,
            has_audio_stream: true,
        })
    }
}

/// Writes a marker file instead of encoding. Validation rejects any output
/// whose path contains `reject_containing`, which lets a test force the
/// delete-and-regenerate path for one track.
#[derive(Default)]
pub struct FakeRenderer {
    pub renders: AtomicUsize,
    pub reject_containing: Option<String>,
}

impl FakeRenderer {
    pub fn rejecting(marker: &str) -> Self {
        Self {
            renders: AtomicUsize::new(0),
            reject_containing: Some(marker.to_string()),
        }
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(
        &self,
        _audio: &Path,
        _image: &Path,
        output: &Path,
        _expected_duration: Option<f64>,
    ) -> EncodeResult<()> {
        self.renders.fetch_add(1, SeqCst);
        tokio::fs::write(output, b"FAKE VIDEO")
            .await
            .map_err(|source| EncodeError::Io {
                path: output.to_path_buf(),
                source,
            })
    }

    async fn validate(&self, output: &Path, _expected_duration: Option<f64>) -> bool {
        if let Some(marker) = &self.reject_containing {
            if output.to_string_lossy().contains(marker.as_str()) {
                return false;
            }
        }
        tokio::fs::try_exists(output).await.unwrap_or(false)
    }
}

/// Records every upload call and hands out sequential ids.
#[derive(Default)]
pub struct FakeUploader {
    pub uploaded_titles: Mutex<Vec<String>>,
    pub playlist_items: Mutex<Vec<String>>,
    pub published_videos: Mutex<Vec<String>>,
    pub published_playlists: Mutex<Vec<String>>,
    pub fail_public_for: Mutex<HashSet<String>>,
}

impl FakeUploader {
    pub fn fail_public(&self, video_id: &str) {
        self.fail_public_for
            .lock()
            .unwrap()
            .insert(video_id.to_string());
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload_video(
        &self,
        _credential: &Credential,
        _video_path: &Path,
        title: &str,
        _description: &str,
    ) -> UploadResult<String> {
        let mut titles = self.uploaded_titles.lock().unwrap();
        titles.push(title.to_string());
        Ok(format!("video-{}", titles.len()))
    }

    async fn create_playlist(
        &self,
        _credential: &Credential,
        _title: &str,
        _description: &str,
    ) -> UploadResult<String> {
        Ok("playlist-1".to_string())
    }

    async fn add_to_playlist(
        &self,
        _credential: &Credential,
        _playlist_id: &str,
        video_id: &str,
    ) -> UploadResult<()> {
        self.playlist_items
            .lock()
            .unwrap()
            .push(video_id.to_string());
        Ok(())
    }

    async fn set_video_public(
        &self,
        _credential: &Credential,
        video_id: &str,
    ) -> UploadResult<()> {
        if self.fail_public_for.lock().unwrap().contains(video_id) {
            return Err(UploadError::Api {
                status: 403,
                body: "quota exceeded".to_string(),
            });
        }
        self.published_videos
            .lock()
            .unwrap()
            .push(video_id.to_string());
        Ok(())
    }

    async fn set_playlist_public(
        &self,
        _credential: &Credential,
        playlist_id: &str,
    ) -> UploadResult<()> {
        self.published_playlists
            .lock()
            .unwrap()
            .push(playlist_id.to_string());
        Ok(())
    }
}

pub fn build_pipeline(
    work_dir: &Path,
    source: Arc<dyn ReleaseSource>,
    renderer: Arc<dyn Renderer>,
    uploader: Arc<dyn Uploader>,
) -> Pipeline {
    let store = Arc::new(ArtifactStore::new(work_dir).unwrap());
    let fetcher = AudioFetcher::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();
    let prober: Arc<dyn Prober> = Arc::new(FakeProber);
    Pipeline::new(
        source,
        store,
        fetcher,
        prober,
        renderer,
        uploader,
        work_dir.join("background.png"),
        (64, 36),
    )
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}
