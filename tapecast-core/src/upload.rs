use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::UploadSection;

pub type UploadResult<T> = Result<T, UploadError>;

/// Captured API error bodies are clipped to keep failure causes readable.
const MAX_BODY_BYTES: usize = 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload api rejected request ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("upload session did not return a location header")]
    NoSession,
    #[error("malformed upload api response: {0}")]
    Malformed(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<reqwest::Error> for UploadError {
    fn from(error: reqwest::Error) -> Self {
        UploadError::Network(error.to_string())
    }
}

/// Opaque, already-validated credential handle. The pipeline never performs
/// OAuth; it only forwards the handle to the upload API.
#[derive(Debug, Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

/// Video-platform capability the pipeline calls into. Videos and playlists
/// are created unlisted; the publish pass flips them public.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload_video(
        &self,
        credential: &Credential,
        video_path: &Path,
        title: &str,
        description: &str,
    ) -> UploadResult<String>;

    async fn create_playlist(
        &self,
        credential: &Credential,
        title: &str,
        description: &str,
    ) -> UploadResult<String>;

    async fn add_to_playlist(
        &self,
        credential: &Credential,
        playlist_id: &str,
        video_id: &str,
    ) -> UploadResult<()>;

    async fn set_video_public(&self, credential: &Credential, video_id: &str) -> UploadResult<()>;

    async fn set_playlist_public(
        &self,
        credential: &Credential,
        playlist_id: &str,
    ) -> UploadResult<()>;
}

pub fn playlist_url(playlist_id: &str) -> String {
    format!("https://www.youtube.com/playlist?list={playlist_id}")
}

/// YouTube Data API v3 client. Uploads use the resumable protocol: a
/// metadata POST opens a session, the bytes go to the returned session URI.
#[derive(Clone)]
pub struct YouTubeUploader {
    client: Client,
    api_base: String,
    upload_base: String,
    privacy: String,
    category_id: String,
}

impl YouTubeUploader {
    pub fn new(client: Client, section: &UploadSection) -> Self {
        Self {
            client,
            api_base: section.api_base.clone(),
            upload_base: section.upload_base.clone(),
            privacy: section.privacy.clone(),
            category_id: section.category_id.clone(),
        }
    }

    async fn expect_success(response: Response) -> UploadResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_BODY_BYTES {
            let mut end = MAX_BODY_BYTES;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        Err(UploadError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn parse_id(response: Response) -> UploadResult<String> {
        let parsed: IdResponse = response
            .json()
            .await
            .map_err(|err| UploadError::Malformed(err.to_string()))?;
        Ok(parsed.id)
    }
}

#[async_trait]
impl Uploader for YouTubeUploader {
    async fn upload_video(
        &self,
        credential: &Credential,
        video_path: &Path,
        title: &str,
        description: &str,
    ) -> UploadResult<String> {
        debug!(path = %video_path.display(), title, "opening resumable upload session");
        let video_bytes = tokio::fs::metadata(video_path)
            .await
            .map_err(|source| UploadError::Io {
                path: video_path.to_path_buf(),
                source,
            })?
            .len();
        let metadata = json!({
            "snippet": {
                "title": title,
                "description": description,
                "categoryId": self.category_id,
            },
            "status": {"privacyStatus": self.privacy},
        });
        let session = self
            .client
            .post(format!(
                "{}/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status",
                self.upload_base
            ))
            .bearer_auth(credential.token())
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", video_bytes)
            .json(&metadata)
            .send()
            .await?;
        let session = Self::expect_success(session).await?;
        let session_uri = session
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(UploadError::NoSession)?;

        let file = tokio::fs::File::open(video_path)
            .await
            .map_err(|source| UploadError::Io {
                path: video_path.to_path_buf(),
                source,
            })?;
        let response = self
            .client
            .put(&session_uri)
            .bearer_auth(credential.token())
            .header(reqwest::header::CONTENT_TYPE, "video/mp4")
            .header(reqwest::header::CONTENT_LENGTH, video_bytes)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        let video_id = Self::parse_id(response).await?;
        info!(video_id, title, "uploaded video");
        Ok(video_id)
    }

    async fn create_playlist(
        &self,
        credential: &Credential,
        title: &str,
        description: &str,
    ) -> UploadResult<String> {
        let body = json!({
            "snippet": {"title": title, "description": description},
            "status": {"privacyStatus": self.privacy},
        });
        let response = self
            .client
            .post(format!(
                "{}/youtube/v3/playlists?part=snippet,status",
                self.api_base
            ))
            .bearer_auth(credential.token())
            .json(&body)
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        let playlist_id = Self::parse_id(response).await?;
        info!(playlist_id, title, "created playlist");
        Ok(playlist_id)
    }

    async fn add_to_playlist(
        &self,
        credential: &Credential,
        playlist_id: &str,
        video_id: &str,
    ) -> UploadResult<()> {
        let body = json!({
            "snippet": {
                "playlistId": playlist_id,
                "resourceId": {"kind": "youtube#video", "videoId": video_id},
            },
        });
        let response = self
            .client
            .post(format!(
                "{}/youtube/v3/playlistItems?part=snippet",
                self.api_base
            ))
            .bearer_auth(credential.token())
            .json(&body)
            .send()
            .await?;
        Self::expect_success(response).await?;
        debug!(playlist_id, video_id, "added video to playlist");
        Ok(())
    }

    async fn set_video_public(&self, credential: &Credential, video_id: &str) -> UploadResult<()> {
        let body = json!({"id": video_id, "status": {"privacyStatus": "public"}});
        let response = self
            .client
            .put(format!("{}/youtube/v3/videos?part=status", self.api_base))
            .bearer_auth(credential.token())
            .json(&body)
            .send()
            .await?;
        Self::expect_success(response).await?;
        info!(video_id, "video made public");
        Ok(())
    }

    async fn set_playlist_public(
        &self,
        credential: &Credential,
        playlist_id: &str,
    ) -> UploadResult<()> {
        let body = json!({"id": playlist_id, "status": {"privacyStatus": "public"}});
        let response = self
            .client
            .put(format!(
                "{}/youtube/v3/playlists?part=status",
                self.api_base
            ))
            .bearer_auth(credential.token())
            .json(&body)
            .send()
            .await?;
        Self::expect_success(response).await?;
        info!(playlist_id, "playlist made public");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}
