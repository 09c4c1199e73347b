use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::fetch::AudioFetcher;
use crate::naming;
use crate::probe::Prober;
use crate::scrape::{ReleaseMetadata, ReleaseSource, ScrapeError, TrackDescriptor};
use crate::store::{
    audio_artifact_name, video_artifact_name, ArtifactKind, ArtifactStore, StoreError,
};
use crate::transcode::{ensure_background, EncodeError, Renderer};
use crate::upload::{playlist_url, Credential, UploadError, Uploader};

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Receives coarse progress while a job runs. Implementations must be cheap;
/// the pipeline calls this between awaits on its own task.
pub trait ProgressSink: Send + Sync {
    fn update(&self, message: &str, current: usize, total: usize);
}

/// Sink for callers that do not track progress.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn update(&self, _message: &str, _current: usize, _total: usize) {}
}

/// Everything a finished job needs to report, and everything a later
/// publish call needs to find its videos again.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub identifier: String,
    pub playlist_id: String,
    pub playlist_url: String,
    pub video_ids: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub videos_made_public: usize,
    pub videos_total: usize,
    pub playlist_updated: bool,
    pub playlist_url: String,
}

/// Description previews are clipped so a dry run stays readable.
const PREVIEW_DESCRIPTION_CHARS: usize = 300;

/// Dry-run view of a release: the exact titles and descriptions a real run
/// would produce, without touching the artifact cache or the upload API.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewReport {
    pub identifier: String,
    pub performer: String,
    pub venue: String,
    pub date: String,
    pub playlist_title: String,
    pub playlist_description: String,
    pub total_duration_seconds: f64,
    pub tracks: Vec<PreviewTrack>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewTrack {
    pub number: u32,
    pub video_title: String,
    pub description_preview: String,
    pub duration_seconds: Option<f64>,
}

pub fn preview(release: &ReleaseMetadata) -> PreviewReport {
    PreviewReport {
        identifier: release.identifier.clone(),
        performer: release.performer.clone(),
        venue: release.venue.clone(),
        date: release.date.clone(),
        playlist_title: naming::playlist_title(release),
        playlist_description: naming::playlist_description(release),
        total_duration_seconds: 0.0,
        tracks: release
            .tracks
            .iter()
            .map(|track| PreviewTrack {
                number: track.number,
                video_title: naming::video_title(track, release),
                description_preview: clip_description(naming::track_description(track, release)),
                duration_seconds: None,
            })
            .collect(),
    }
}

/// A clipped preview gets a trailing `...` so it reads as cut, not complete.
fn clip_description(full: String) -> String {
    if full.chars().count() <= PREVIEW_DESCRIPTION_CHARS {
        return full;
    }
    let mut clipped: String = full.chars().take(PREVIEW_DESCRIPTION_CHARS).collect();
    clipped.push_str("...");
    clipped
}

/// Preview plus remote duration probes, one per track. A track that cannot
/// be probed simply reports no duration; it never fails the preview.
pub async fn preview_with_durations(
    release: &ReleaseMetadata,
    prober: &dyn Prober,
) -> PreviewReport {
    let mut report = preview(release);
    for (entry, track) in report.tracks.iter_mut().zip(&release.tracks) {
        entry.duration_seconds = match prober.probe(&track.audio_url).await {
            Ok(probed) if probed.duration_seconds > 0.0 => Some(probed.duration_seconds),
            Ok(_) => None,
            Err(err) => {
                warn!(url = %track.audio_url, error = %err, "could not probe track for preview");
                None
            }
        };
    }
    report.total_duration_seconds = report
        .tracks
        .iter()
        .filter_map(|entry| entry.duration_seconds)
        .sum();
    report
}

/// Drives one release through scrape, download, render, upload and playlist
/// assembly. Stateless apart from the artifact cache, so re-running the same
/// release resumes from whatever valid artifacts already exist.
pub struct Pipeline {
    source: Arc<dyn ReleaseSource>,
    store: Arc<ArtifactStore>,
    fetcher: AudioFetcher,
    prober: Arc<dyn Prober>,
    renderer: Arc<dyn Renderer>,
    uploader: Arc<dyn Uploader>,
    background: PathBuf,
    frame_size: (u32, u32),
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        store: Arc<ArtifactStore>,
        fetcher: AudioFetcher,
        prober: Arc<dyn Prober>,
        renderer: Arc<dyn Renderer>,
        uploader: Arc<dyn Uploader>,
        background: PathBuf,
        frame_size: (u32, u32),
    ) -> Self {
        Self {
            source,
            store,
            fetcher,
            prober,
            renderer,
            uploader,
            background,
            frame_size,
        }
    }

    pub async fn run(
        &self,
        source_url: &str,
        credential: &Credential,
        progress: &dyn ProgressSink,
    ) -> PipelineResult<PipelineReport> {
        progress.update("extracting release metadata", 0, 1);
        let release = self.source.extract_metadata(source_url).await?;
        let total = release.tracks.len();
        info!(
            identifier = %release.identifier,
            performer = %release.performer,
            tracks = total,
            "starting release"
        );

        if let Ok(cached) = self
            .store
            .find_existing(&release.identifier, ArtifactKind::Video)
            .await
        {
            if !cached.is_empty() {
                info!(
                    identifier = %release.identifier,
                    cached = cached.len(),
                    "resuming with cached video artifacts"
                );
            }
        }

        let background =
            ensure_background(&self.background, self.frame_size.0, self.frame_size.1).await?;

        let mut rendered: Vec<(&TrackDescriptor, PathBuf)> = Vec::with_capacity(total);
        for track in &release.tracks {
            progress.update(
                &format!("downloading track {}/{}", track.number, total),
                track.number as usize,
                total,
            );
            let audio = self.obtain_audio(&release.identifier, track).await?;

            progress.update(
                &format!("rendering track {}/{}", track.number, total),
                track.number as usize,
                total,
            );
            let expected_duration = self.audio_duration(&audio).await;
            let video = self
                .obtain_video(&release.identifier, track, &audio, &background, expected_duration)
                .await?;
            rendered.push((track, video));
        }

        let mut video_ids = Vec::with_capacity(rendered.len());
        for (track, video) in &rendered {
            progress.update(
                &format!("uploading track {}/{}", track.number, total),
                track.number as usize,
                total,
            );
            let title = naming::video_title(track, &release);
            let description = naming::track_description(track, &release);
            let video_id = self
                .uploader
                .upload_video(credential, video, &title, &description)
                .await?;
            video_ids.push(video_id);
        }

        progress.update("assembling playlist", total, total);
        let playlist_id = self
            .uploader
            .create_playlist(
                credential,
                &naming::playlist_title(&release),
                &naming::playlist_description(&release),
            )
            .await?;
        for video_id in &video_ids {
            self.uploader
                .add_to_playlist(credential, &playlist_id, video_id)
                .await?;
        }

        let report = PipelineReport {
            identifier: release.identifier.clone(),
            playlist_url: playlist_url(&playlist_id),
            playlist_id,
            video_ids,
            completed_at: Utc::now(),
        };
        info!(
            identifier = %report.identifier,
            playlist = %report.playlist_id,
            videos = report.video_ids.len(),
            "release complete"
        );
        Ok(report)
    }

    /// Flip a completed release's videos and playlist to public. Individual
    /// failures are counted rather than aborting, so a partially published
    /// release reports exactly how far it got.
    pub async fn publish(
        &self,
        credential: &Credential,
        report: &PipelineReport,
    ) -> PublishOutcome {
        let mut made_public = 0;
        for video_id in &report.video_ids {
            match self.uploader.set_video_public(credential, video_id).await {
                Ok(()) => made_public += 1,
                Err(err) => {
                    warn!(video_id, error = %err, "failed to make video public");
                }
            }
        }
        let playlist_updated = match self
            .uploader
            .set_playlist_public(credential, &report.playlist_id)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(playlist = %report.playlist_id, error = %err, "failed to make playlist public");
                false
            }
        };
        PublishOutcome {
            videos_made_public: made_public,
            videos_total: report.video_ids.len(),
            playlist_updated,
            playlist_url: report.playlist_url.clone(),
        }
    }

    /// Audio artifacts are cached by existence: a present file is trusted,
    /// a missing one is downloaded.
    async fn obtain_audio(
        &self,
        release_id: &str,
        track: &TrackDescriptor,
    ) -> PipelineResult<PathBuf> {
        let name = audio_artifact_name(release_id, track.number, &track.filename);
        let fetcher = self.fetcher.clone();
        let url = track.audio_url.clone();
        let path = self
            .store
            .resolve_or_create(
                &name,
                |path| async move { tokio::fs::try_exists(&path).await.unwrap_or(false) },
                |path| {
                    let fetcher = fetcher.clone();
                    let url = url.clone();
                    async move { fetcher.download(&url, &path).await }
                },
            )
            .await?;
        Ok(path)
    }

    async fn obtain_video(
        &self,
        release_id: &str,
        track: &TrackDescriptor,
        audio: &Path,
        background: &Path,
        expected_duration: Option<f64>,
    ) -> PipelineResult<PathBuf> {
        let name = video_artifact_name(release_id, track.number);
        let renderer = self.renderer.clone();
        let path = self
            .store
            .resolve_or_create(
                &name,
                |path| {
                    let renderer = renderer.clone();
                    async move { renderer.validate(&path, expected_duration).await }
                },
                |path| {
                    let renderer = renderer.clone();
                    let audio = audio.to_path_buf();
                    let background = background.to_path_buf();
                    async move {
                        renderer
                            .render(&audio, &background, &path, expected_duration)
                            .await
                    }
                },
            )
            .await?;
        Ok(path)
    }

    /// A probe failure on the source audio is not fatal; it only means the
    /// rendered video cannot be checked against an expected duration.
    async fn audio_duration(&self, audio: &Path) -> Option<f64> {
        match self.prober.probe(&audio.to_string_lossy()).await {
            Ok(report) if report.duration_seconds > 0.0 => Some(report.duration_seconds),
            Ok(_) => None,
            Err(err) => {
                warn!(path = %audio.display(), error = %err, "could not probe source audio");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_carries_final_titles() {
        let release = ReleaseMetadata {
            identifier: "gd77".into(),
            title: "1977-05-08".into(),
            performer: "Grateful Dead".into(),
            venue: "Barton Hall".into(),
            date: "1977-05-08".into(),
            source_url: "https://archive.org/details/gd77".into(),
            tracks: vec![TrackDescriptor {
                number: 1,
                name: "Scarlet &gt; Fire".into(),
                audio_url: "https://archive.org/download/gd77/t1.mp3".into(),
                filename: "t1.mp3".into(),
            }],
        };
        let report = preview(&release);
        assert_eq!(report.playlist_title, "Grateful Dead - 1977-05-08 Barton Hall");
        assert_eq!(
            report.tracks[0].video_title,
            "Grateful Dead - Scarlet > Fire - 1977-05-08"
        );
        assert!(report.tracks[0]
            .description_preview
            .starts_with("Grateful Dead live at Barton Hall"));
        assert!(report.tracks[0].description_preview.chars().count() <= 300);
        assert!(!report.tracks[0].description_preview.ends_with("..."));
        assert!(report.tracks[0].duration_seconds.is_none());
    }

    #[test]
    fn long_description_preview_is_clipped_with_ellipsis() {
        let release = ReleaseMetadata {
            identifier: "gd77".into(),
            title: "1977-05-08".into(),
            performer: "Grateful Dead".into(),
            venue: "B".repeat(400),
            date: "1977-05-08".into(),
            source_url: "https://archive.org/details/gd77".into(),
            tracks: vec![TrackDescriptor {
                number: 1,
                name: "Jack Straw".into(),
                audio_url: "https://archive.org/download/gd77/t1.mp3".into(),
                filename: "t1.mp3".into(),
            }],
        };
        let clipped = &preview(&release).tracks[0].description_preview;
        assert!(clipped.ends_with("..."));
        assert_eq!(clipped.chars().count(), PREVIEW_DESCRIPTION_CHARS + 3);
    }
}
