use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ProbeSection;

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors produced while inspecting media with the external probe tool.
///
/// Callers treat any of these as "unknown/invalid": duration falls back to
/// zero and artifacts under validation are considered invalid. A probe
/// failure is never fatal to the process.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe exited with non-zero status: {0}")]
    Command(String),
    #[error("ffprobe timed out after {0:?}")]
    Timeout(Duration),
    #[error("ffprobe is not installed or not on PATH")]
    Missing,
    #[error("failed to spawn ffprobe: {0}")]
    Spawn(std::io::Error),
    #[error("invalid ffprobe payload: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ProbeError {
    fn from(source: serde_json::Error) -> Self {
        ProbeError::Parse(source.to_string())
    }
}

/// Duration and stream composition of one media file.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub duration_seconds: f64,
    pub has_video_stream: bool,
    pub has_audio_stream: bool,
}

#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe a local file or a remote URL.
    async fn probe(&self, target: &str) -> ProbeResult<ProbeReport>;
}

#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: String,
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(section: &ProbeSection) -> Self {
        Self::new(section.binary.clone(), section.timeout())
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, target: &str) -> ProbeResult<ProbeReport> {
        let mut command = Command::new(&self.binary);
        command
            .kill_on_drop(true)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(target);
        let output = match timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProbeError::Missing)
            }
            Ok(Err(err)) => return Err(ProbeError::Spawn(err)),
            Err(_) => return Err(ProbeError::Timeout(self.timeout)),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Command(stderr.trim().to_string()));
        }
        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        Ok(parsed.into_report())
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

impl FfprobeOutput {
    fn into_report(self) -> ProbeReport {
        let duration_seconds = self
            .format
            .duration
            .as_deref()
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or_default();
        let has_video_stream = self
            .streams
            .iter()
            .any(|stream| stream.codec_type.as_deref() == Some("video"));
        let has_audio_stream = self
            .streams
            .iter()
            .any(|stream| stream.codec_type.as_deref() == Some("audio"));
        ProbeReport {
            duration_seconds,
            has_video_stream,
            has_audio_stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}
