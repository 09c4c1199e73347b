use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info};
use url::Url;

use crate::config::DownloadSection;

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid download url {0}")]
    InvalidUrl(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("download stalled: no data for {0:?}")]
    Stalled(Duration),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        FetchError::Network(error.to_string())
    }
}

/// Streams remote audio to the artifact cache.
///
/// Writes go to a `.part` companion first and are renamed into place on
/// success, so a crash mid-download can never be mistaken for a complete
/// cached file. `file://` URLs short-circuit to a filesystem copy.
///
/// `read_timeout` bounds each wait for the response and for the next body
/// chunk, not the whole transfer, so a long download survives as long as
/// bytes keep arriving.
#[derive(Clone)]
pub struct AudioFetcher {
    client: Client,
    read_timeout: Duration,
}

impl AudioFetcher {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent("tapecast/0.1")
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| FetchError::Network(err.to_string()))?;
        Ok(Self {
            client,
            read_timeout,
        })
    }

    pub fn from_config(section: &DownloadSection) -> FetchResult<Self> {
        Self::new(section.connect_timeout(), section.read_timeout())
    }

    pub async fn download(&self, url: &str, dest: &Path) -> FetchResult<()> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if parsed.scheme() == "file" {
            let source = parsed
                .to_file_path()
                .map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
            fs::copy(&source, dest)
                .await
                .map_err(|source| FetchError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
            debug!(path = %dest.display(), "copied local audio source");
            return Ok(());
        }

        let part = in_progress_path(dest);
        let response = timeout(self.read_timeout, self.client.get(parsed).send())
            .await
            .map_err(|_| FetchError::Stalled(self.read_timeout))??
            .error_for_status()?;
        let total_bytes = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(&part)
            .await
            .map_err(|source| FetchError::Io {
                path: part.clone(),
                source,
            })?;
        let mut downloaded = 0u64;
        loop {
            let chunk = match timeout(self.read_timeout, stream.next()).await {
                Ok(chunk) => chunk,
                Err(_) => {
                    let _ = fs::remove_file(&part).await;
                    return Err(FetchError::Stalled(self.read_timeout));
                }
            };
            let Some(chunk) = chunk else { break };
            let data = match chunk {
                Ok(data) => data,
                Err(err) => {
                    let _ = fs::remove_file(&part).await;
                    return Err(err.into());
                }
            };
            downloaded += data.len() as u64;
            if let Err(source) = file.write_all(&data).await {
                let _ = fs::remove_file(&part).await;
                return Err(FetchError::Io {
                    path: part.clone(),
                    source,
                });
            }
        }
        file.flush().await.map_err(|source| FetchError::Io {
            path: part.clone(),
            source,
        })?;
        drop(file);
        fs::rename(&part, dest)
            .await
            .map_err(|source| FetchError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        info!(
            url,
            path = %dest.display(),
            bytes = downloaded,
            expected = ?total_bytes,
            "downloaded audio"
        );
        Ok(())
    }
}

fn in_progress_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    name.push_str(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_marker_sits_next_to_target() {
        let dest = Path::new("/tmp/cache/rel_track_1.mp3");
        assert_eq!(
            in_progress_path(dest),
            PathBuf::from("/tmp/cache/rel_track_1.mp3.part")
        );
    }

    #[tokio::test]
    async fn file_url_downloads_copy_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mp3");
        fs::write(&source, b"AUDIO").await.unwrap();
        let dest = dir.path().join("dest.mp3");
        let fetcher = AudioFetcher::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();
        fetcher
            .download(&format!("file://{}", source.display()), &dest)
            .await
            .unwrap();
        assert_eq!(fs::read(&dest).await.unwrap(), b"AUDIO");
    }

    #[tokio::test]
    async fn garbage_url_is_rejected() {
        let fetcher = AudioFetcher::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();
        let err = fetcher
            .download("not a url", Path::new("/tmp/never"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn stalled_download_times_out_and_drops_the_part_file() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Headers plus a few body bytes, then silence with the
            // connection held open.
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000\r\n\r\nabc")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("track.mp3");
        let fetcher =
            AudioFetcher::new(Duration::from_secs(5), Duration::from_millis(200)).unwrap();
        let err = fetcher
            .download(&format!("http://{addr}/track.mp3"), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Stalled(_)));
        assert!(!dest.exists());
        assert!(!in_progress_path(&dest).exists());
    }
}
