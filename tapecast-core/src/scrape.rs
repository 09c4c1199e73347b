use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub type ScrapeResult<T> = Result<T, ScrapeError>;

const METADATA_API_BASE: &str = "https://archive.org/metadata";
const DOWNLOAD_BASE: &str = "https://archive.org/download";

/// Audio formats worth downloading, in preference order when a track is
/// published in several encodings.
const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "flac", "ogg", "m4a"];

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("unsupported source url: {0}")]
    UnsupportedUrl(String),
    #[error("release {0} has no tracks")]
    NoTracks(String),
    #[error("release {0} has no downloadable audio files")]
    NoAudio(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed metadata document: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ScrapeError {
    fn from(error: reqwest::Error) -> Self {
        ScrapeError::Network(error.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(error: serde_json::Error) -> Self {
        ScrapeError::Malformed(error.to_string())
    }
}

/// One unit of pipeline work. Immutable once produced by the scrape step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// 1-based sequence number within the release.
    pub number: u32,
    /// Raw display name; consumers must sanitize before rendering it into
    /// a title, filename or description.
    pub name: String,
    pub audio_url: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseMetadata {
    pub identifier: String,
    pub title: String,
    pub performer: String,
    pub venue: String,
    pub date: String,
    pub source_url: String,
    pub tracks: Vec<TrackDescriptor>,
}

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn extract_metadata(&self, source_url: &str) -> ScrapeResult<ReleaseMetadata>;
}

/// Release source backed by the public archive.org metadata JSON API.
#[derive(Clone)]
pub struct ArchiveOrgSource {
    client: Client,
    api_base: String,
    download_base: String,
}

impl ArchiveOrgSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_base: METADATA_API_BASE.to_string(),
            download_base: DOWNLOAD_BASE.to_string(),
        }
    }

    /// Point the client at a different API host. Test hook.
    pub fn with_bases(
        mut self,
        api_base: impl Into<String>,
        download_base: impl Into<String>,
    ) -> Self {
        self.api_base = api_base.into();
        self.download_base = download_base.into();
        self
    }
}

#[async_trait]
impl ReleaseSource for ArchiveOrgSource {
    async fn extract_metadata(&self, source_url: &str) -> ScrapeResult<ReleaseMetadata> {
        let identifier = parse_identifier(source_url)
            .ok_or_else(|| ScrapeError::UnsupportedUrl(source_url.to_string()))?;
        debug!(identifier, "fetching release metadata");
        let document: MetadataDocument = self
            .client
            .get(format!("{}/{identifier}", self.api_base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        build_release(
            &identifier,
            source_url,
            &self.download_base,
            document,
        )
    }
}

/// Extract the release identifier from an `archive.org/details/{id}` URL.
pub fn parse_identifier(source_url: &str) -> Option<String> {
    let marker = "archive.org/details/";
    let start = source_url.find(marker)? + marker.len();
    let rest = &source_url[start..];
    let identifier: String = rest
        .chars()
        .take_while(|c| !matches!(c, '/' | '?' | '#'))
        .collect();
    if identifier.is_empty() {
        None
    } else {
        Some(identifier)
    }
}

fn build_release(
    identifier: &str,
    source_url: &str,
    download_base: &str,
    document: MetadataDocument,
) -> ScrapeResult<ReleaseMetadata> {
    let mut candidates: Vec<&FileEntry> = document
        .files
        .iter()
        .filter(|file| is_audio(&file.name))
        .collect();
    if candidates.is_empty() {
        return Err(ScrapeError::NoAudio(identifier.to_string()));
    }

    // A release often carries the same track in multiple encodings; keep
    // one file per stem, preferring the earlier entry in AUDIO_EXTENSIONS.
    candidates.sort_by_key(|file| {
        (
            file_stem(&file.name).to_string(),
            extension_rank(&file.name),
        )
    });
    candidates.dedup_by(|a, b| file_stem(&a.name) == file_stem(&b.name));
    candidates.sort_by_key(|file| (file.track_number(), file.name.clone()));

    let base = Url::parse(&format!("{download_base}/{identifier}/"))
        .map_err(|err| ScrapeError::Malformed(err.to_string()))?;
    let mut tracks = Vec::with_capacity(candidates.len());
    for (index, file) in candidates.iter().enumerate() {
        let number = (index + 1) as u32;
        let audio_url = base
            .join(&file.name)
            .map_err(|err| ScrapeError::Malformed(err.to_string()))?;
        let name = file
            .title
            .clone()
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| file_stem(&file.name).to_string());
        tracks.push(TrackDescriptor {
            number,
            name,
            audio_url: audio_url.to_string(),
            filename: file.name.clone(),
        });
    }
    if tracks.is_empty() {
        return Err(ScrapeError::NoTracks(identifier.to_string()));
    }

    let metadata = document.metadata;
    Ok(ReleaseMetadata {
        identifier: identifier.to_string(),
        title: metadata.title.unwrap_or_else(|| "Unknown".to_string()),
        performer: metadata
            .creator
            .map(|creator| creator.join())
            .unwrap_or_else(|| "Unknown".to_string()),
        venue: metadata
            .venue
            .or(metadata.coverage)
            .unwrap_or_else(|| "Unknown".to_string()),
        date: metadata.date.unwrap_or_else(|| "Unknown".to_string()),
        source_url: source_url.to_string(),
        tracks,
    })
}

fn is_audio(name: &str) -> bool {
    extension_rank(name) < AUDIO_EXTENSIONS.len()
}

fn extension_rank(name: &str) -> usize {
    let extension = std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .position(|candidate| *candidate == extension)
        .unwrap_or(AUDIO_EXTENSIONS.len())
}

fn file_stem(name: &str) -> &str {
    std::path::Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(name)
}

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    metadata: ReleaseFields,
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize, Default)]
struct ReleaseFields {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    creator: Option<OneOrMany>,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    coverage: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn join(self) -> String {
        match self {
            OneOrMany::One(value) => value,
            OneOrMany::Many(values) => values.join(", "),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    track: Option<String>,
}

impl FileEntry {
    fn track_number(&self) -> u32 {
        self.track
            .as_deref()
            .and_then(|raw| raw.split('/').next())
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(u32::MAX)
    }
}
