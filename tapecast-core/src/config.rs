use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read { source: io::Error, path: PathBuf },
    #[error("config file {path} is not valid TOML: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("paths.work_dir must be absolute, got {0:?}")]
    RelativeWorkDir(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TapecastConfig {
    pub server: ServerSection,
    pub paths: PathsSection,
    pub download: DownloadSection,
    pub probe: ProbeSection,
    pub encoder: EncoderSection,
    pub upload: UploadSection,
}

impl TapecastConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.work_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    /// Durable artifact cache. Survives process restarts; that is what
    /// makes re-submission of the same release cheap.
    pub work_dir: String,
    pub background_image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    pub connect_timeout_seconds: u64,
    /// Longest silence tolerated mid-download before the transfer is
    /// abandoned and its partial file discarded.
    pub read_timeout_seconds: u64,
}

impl DownloadSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSection {
    pub binary: String,
    pub timeout_seconds: u64,
}

impl ProbeSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderSection {
    pub binary: String,
    pub preset: String,
    pub crf: u8,
    pub audio_bitrate: String,
    pub width: u32,
    pub height: u32,
    pub timeout_minutes: u64,
}

impl EncoderSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadSection {
    pub api_base: String,
    pub upload_base: String,
    pub privacy: String,
    pub category_id: String,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> ConfigResult<TapecastConfig> {
    let config: TapecastConfig = load_toml(path)?;
    // resolve_path anchors relative paths on work_dir, so work_dir itself
    // must not be relative to wherever the daemon happened to start.
    if !Path::new(&config.paths.work_dir).is_absolute() {
        return Err(ConfigError::RelativeWorkDir(config.paths.work_dir.clone()));
    }
    Ok(config)
}

fn load_toml<T, P>(path: P) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
