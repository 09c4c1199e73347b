use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::info;

use tapecast_core::{
    load_config, ArchiveOrgSource, ArtifactStore, AudioFetcher, EncoderSettings, FfmpegRenderer,
    FfprobeProber, JobRegistry, Pipeline, Prober, ReleaseSource, Renderer, Uploader,
    YouTubeUploader,
};

pub mod error;
pub mod routes;
pub mod server;

pub use server::{router, AppState};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] tapecast_core::ConfigError),
    #[error("artifact store error: {0}")]
    Store(#[from] tapecast_core::StoreError),
    #[error("http client error: {0}")]
    Http(#[from] tapecast_core::FetchError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Release-to-playlist processing daemon", long_about = None)]
pub struct Cli {
    /// Path to tapecast.toml
    #[arg(long, default_value = "configs/tapecast.toml")]
    pub config: PathBuf,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    let store = Arc::new(ArtifactStore::new(&config.paths.work_dir)?);
    let fetcher = AudioFetcher::from_config(&config.download)?;
    let client = reqwest::Client::builder()
        .user_agent(concat!("tapecast/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| {
            AppError::Http(tapecast_core::FetchError::Network(err.to_string()))
        })?;
    let source: Arc<dyn ReleaseSource> = Arc::new(ArchiveOrgSource::new(client.clone()));
    let prober: Arc<dyn Prober> = Arc::new(FfprobeProber::from_config(&config.probe));
    let renderer: Arc<dyn Renderer> = Arc::new(FfmpegRenderer::new(
        EncoderSettings::from(&config.encoder),
        prober.clone(),
    ));
    let uploader: Arc<dyn Uploader> = Arc::new(YouTubeUploader::new(client, &config.upload));

    let background = config.resolve_path(&config.paths.background_image);
    let pipeline = Arc::new(Pipeline::new(
        source.clone(),
        store,
        fetcher,
        prober.clone(),
        renderer,
        uploader,
        background,
        (config.encoder.width, config.encoder.height),
    ));
    let registry = JobRegistry::new(pipeline);
    let state = AppState {
        registry,
        source,
        prober,
    };

    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
