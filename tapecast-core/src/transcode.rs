use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageBuffer, Rgb};
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::EncoderSection;
use crate::probe::Prober;

pub type EncodeResult<T> = Result<T, EncodeError>;

/// Rendered files smaller than this are treated as corrupt.
pub const MIN_VIDEO_BYTES: u64 = 1024;

/// A probed duration may drift this far from the source audio before the
/// artifact is considered incomplete.
pub const DURATION_TOLERANCE_SECONDS: f64 = 5.0;

/// Captured encoder stderr is clipped to keep failure causes readable.
const MAX_STDERR_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("ffmpeg exited with status {status}: {stderr}")]
    Encoder { status: i32, stderr: String },
    #[error("ffmpeg timed out after {0:?}")]
    Timeout(Duration),
    #[error("ffmpeg reported success but produced no output at {0}")]
    MissingOutput(PathBuf),
    #[error("ffmpeg is not installed or not on PATH")]
    Missing,
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Renders one video artifact from one audio artifact plus a still image,
/// and validates rendered artifacts against the video invariants.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        audio: &Path,
        image: &Path,
        output: &Path,
        expected_duration: Option<f64>,
    ) -> EncodeResult<()>;

    /// True when the file at `output` satisfies every video-artifact
    /// invariant: size, positive duration, both stream kinds, and (when
    /// known) duration within tolerance of the source audio.
    async fn validate(&self, output: &Path, expected_duration: Option<f64>) -> bool;
}

pub fn duration_within_tolerance(probed: f64, expected: f64) -> bool {
    (probed - expected).abs() <= DURATION_TOLERANCE_SECONDS
}

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub binary: String,
    pub preset: String,
    pub crf: u8,
    pub audio_bitrate: String,
    pub width: u32,
    pub height: u32,
    pub timeout: Duration,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            preset: "slow".to_string(),
            crf: 18,
            audio_bitrate: "192k".to_string(),
            width: 1920,
            height: 1080,
            timeout: Duration::from_secs(3600),
        }
    }
}

impl From<&EncoderSection> for EncoderSettings {
    fn from(section: &EncoderSection) -> Self {
        Self {
            binary: section.binary.clone(),
            preset: section.preset.clone(),
            crf: section.crf,
            audio_bitrate: section.audio_bitrate.clone(),
            width: section.width,
            height: section.height,
            timeout: section.timeout(),
        }
    }
}

pub struct FfmpegRenderer {
    settings: EncoderSettings,
    prober: Arc<dyn Prober>,
}

impl FfmpegRenderer {
    pub fn new(settings: EncoderSettings, prober: Arc<dyn Prober>) -> Self {
        Self { settings, prober }
    }

    fn scale_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            w = self.settings.width,
            h = self.settings.height
        )
    }

    async fn cleanup_partial(&self, output: &Path) {
        if let Err(err) = fs::remove_file(output).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %output.display(), error = %err, "failed to remove partial output");
            }
        }
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render(
        &self,
        audio: &Path,
        image: &Path,
        output: &Path,
        expected_duration: Option<f64>,
    ) -> EncodeResult<()> {
        debug!(
            audio = %audio.display(),
            image = %image.display(),
            output = %output.display(),
            expected = ?expected_duration,
            "rendering video"
        );
        let mut command = Command::new(&self.settings.binary);
        command
            .kill_on_drop(true)
            .arg("-y")
            .arg("-loop")
            .arg("1")
            .arg("-i")
            .arg(image)
            .arg("-i")
            .arg(audio)
            .arg("-c:v")
            .arg("libx264")
            .arg("-preset")
            .arg(&self.settings.preset)
            .arg("-crf")
            .arg(self.settings.crf.to_string())
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(&self.settings.audio_bitrate)
            .arg("-shortest")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-vf")
            .arg(self.scale_filter())
            .arg(output);

        let execution = timeout(self.settings.timeout, command.output()).await;
        let result = match execution {
            Ok(Ok(result)) => result,
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(EncodeError::Missing)
            }
            Ok(Err(source)) => {
                self.cleanup_partial(output).await;
                return Err(EncodeError::Io {
                    path: output.to_path_buf(),
                    source,
                });
            }
            Err(_) => {
                self.cleanup_partial(output).await;
                return Err(EncodeError::Timeout(self.settings.timeout));
            }
        };

        if !result.status.success() {
            self.cleanup_partial(output).await;
            let mut stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            if stderr.len() > MAX_STDERR_BYTES {
                let mut end = MAX_STDERR_BYTES;
                while !stderr.is_char_boundary(end) {
                    end -= 1;
                }
                stderr.truncate(end);
            }
            return Err(EncodeError::Encoder {
                status: result.status.code().unwrap_or(-1),
                stderr,
            });
        }

        if !output.exists() {
            return Err(EncodeError::MissingOutput(output.to_path_buf()));
        }
        info!(output = %output.display(), "rendered video");
        Ok(())
    }

    async fn validate(&self, output: &Path, expected_duration: Option<f64>) -> bool {
        let size = match fs::metadata(output).await {
            Ok(metadata) => metadata.len(),
            Err(_) => return false,
        };
        if size < MIN_VIDEO_BYTES {
            warn!(path = %output.display(), size, "video artifact suspiciously small");
            return false;
        }
        let report = match self.prober.probe(&output.to_string_lossy()).await {
            Ok(report) => report,
            Err(err) => {
                warn!(path = %output.display(), error = %err, "probe failed, treating artifact as invalid");
                return false;
            }
        };
        if report.duration_seconds <= 0.0 {
            warn!(path = %output.display(), "video artifact has no duration");
            return false;
        }
        if !report.has_video_stream || !report.has_audio_stream {
            warn!(
                path = %output.display(),
                video = report.has_video_stream,
                audio = report.has_audio_stream,
                "video artifact is missing a stream"
            );
            return false;
        }
        if let Some(expected) = expected_duration {
            if !duration_within_tolerance(report.duration_seconds, expected) {
                warn!(
                    path = %output.display(),
                    probed = report.duration_seconds,
                    expected,
                    "video artifact duration out of tolerance"
                );
                return false;
            }
        }
        true
    }
}

/// Make sure a usable background image exists at `path`, generating a
/// plain gradient frame when the configured asset is missing so the
/// pipeline never fails on a missing file.
pub async fn ensure_background(path: &Path, width: u32, height: u32) -> EncodeResult<PathBuf> {
    if fs::try_exists(path).await.unwrap_or(false) {
        return Ok(path.to_path_buf());
    }
    warn!(path = %path.display(), "background image missing, generating placeholder");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| EncodeError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let mut buffer = ImageBuffer::<Rgb<u8>, Vec<u8>>::new(width, height);
    for (x, y, pixel) in buffer.enumerate_pixels_mut() {
        let fx = x as f32 / width as f32;
        let fy = y as f32 / height as f32;
        *pixel = Rgb([
            (18.0 + 60.0 * fx) as u8,
            (22.0 + 40.0 * (1.0 - fx)) as u8,
            (30.0 + 70.0 * fy) as u8,
        ]);
    }
    buffer
        .save(path)
        .map_err(|err| EncodeError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
        })?;
    Ok(path.to_path_buf())
}
