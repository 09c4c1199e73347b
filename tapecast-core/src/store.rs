use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub type StoreResult<T> = Result<T, StoreError>;

/// How many times a producer may run before the store gives up on a key.
/// One initial production plus one regeneration after a failed validation.
const MAX_PRODUCE_ATTEMPTS: u32 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact {name} failed validation after {attempts} attempts")]
    Invalid { name: String, attempts: u32 },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error(transparent)]
    Producer(Box<dyn std::error::Error + Send + Sync>),
}

/// Kind of durable file held in the cache; part of the deterministic name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Audio,
    Video,
}

/// Deterministic audio artifact name for (release, track). The extension
/// comes from the source filename hint, so repeated runs of the same
/// release converge on the same path.
pub fn audio_artifact_name(release_id: &str, track_number: u32, source_filename: &str) -> String {
    let extension = Path::new(source_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("mp3");
    format!("{release_id}_track_{track_number}.{extension}")
}

/// Deterministic video artifact name for (release, track).
pub fn video_artifact_name(release_id: &str, track_number: u32) -> String {
    format!("{release_id}_video_{track_number}.mp4")
}

/// Filesystem-backed cache of pipeline artifacts keyed by deterministic
/// names. Owns the skip-if-valid resume logic: an existing artifact that
/// passes validation is returned without running its producer, an invalid
/// one is deleted and regenerated.
pub struct ArtifactStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Return the artifact at `name`, producing it if missing or invalid.
    ///
    /// - An existing file that passes `validator` is reused as-is.
    /// - An existing file that fails `validator` is deleted and regenerated.
    /// - A freshly produced file that fails `validator` is deleted and the
    ///   producer runs once more; a second failure surfaces as
    ///   `StoreError::Invalid` rather than a corrupt path.
    ///
    /// Concurrent calls for the same name serialize on a per-key lock, so
    /// two jobs for the same release cannot interleave producers on one
    /// path.
    pub async fn resolve_or_create<V, VFut, P, PFut, E>(
        &self,
        name: &str,
        validator: V,
        producer: P,
    ) -> StoreResult<PathBuf>
    where
        V: Fn(PathBuf) -> VFut,
        VFut: Future<Output = bool>,
        P: Fn(PathBuf) -> PFut,
        PFut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let lock = self.key_lock(name).await;
        let _guard = lock.lock().await;

        let path = self.path_for(name);
        if path.exists() {
            if validator(path.clone()).await {
                debug!(artifact = name, "reusing valid cached artifact");
                return Ok(path);
            }
            warn!(
                artifact = name,
                "existing artifact failed validation, regenerating"
            );
            self.remove(&path).await?;
        }

        for attempt in 1..=MAX_PRODUCE_ATTEMPTS {
            producer(path.clone())
                .await
                .map_err(|err| StoreError::Producer(err.into()))?;
            if validator(path.clone()).await {
                info!(artifact = name, attempt, "artifact produced and validated");
                return Ok(path);
            }
            warn!(
                artifact = name,
                attempt, "produced artifact failed validation, deleting"
            );
            self.remove(&path).await?;
        }

        Err(StoreError::Invalid {
            name: name.to_string(),
            attempts: MAX_PRODUCE_ATTEMPTS,
        })
    }

    /// Delete a cached artifact. Missing files are not an error.
    pub async fn remove(&self, path: &Path) -> StoreResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed artifact");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// List cached artifacts for one release, for resume diagnostics.
    pub async fn find_existing(
        &self,
        release_id: &str,
        kind: ArtifactKind,
    ) -> StoreResult<Vec<PathBuf>> {
        let prefix = match kind {
            ArtifactKind::Audio => format!("{release_id}_track_"),
            ArtifactKind::Video => format!("{release_id}_video_"),
        };
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })? {
            let file_name = entry.file_name();
            if file_name.to_string_lossy().starts_with(&prefix) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    async fn key_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(name.to_string()).or_default().clone()
    }
}
