pub mod config;
pub mod fetch;
pub mod jobs;
pub mod naming;
pub mod pipeline;
pub mod probe;
pub mod scrape;
pub mod store;
pub mod transcode;
pub mod upload;

pub use config::{load_config, ConfigError, ConfigResult, TapecastConfig};
pub use fetch::{AudioFetcher, FetchError, FetchResult};
pub use jobs::{JobError, JobRecord, JobRegistry, JobStatus, Progress};
pub use pipeline::{
    preview, preview_with_durations, NullSink, Pipeline, PipelineError, PipelineReport,
    PipelineResult, PreviewReport, PreviewTrack, ProgressSink, PublishOutcome,
};
pub use probe::{FfprobeProber, ProbeError, ProbeReport, ProbeResult, Prober};
pub use scrape::{
    parse_identifier, ArchiveOrgSource, ReleaseMetadata, ReleaseSource, ScrapeError, ScrapeResult,
    TrackDescriptor,
};
pub use store::{
    audio_artifact_name, video_artifact_name, ArtifactKind, ArtifactStore, StoreError, StoreResult,
};
pub use transcode::{
    duration_within_tolerance, ensure_background, EncodeError, EncodeResult, EncoderSettings,
    FfmpegRenderer, Renderer,
};
pub use upload::{
    playlist_url, Credential, UploadError, UploadResult, Uploader, YouTubeUploader,
};
