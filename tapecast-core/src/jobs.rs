use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::pipeline::{Pipeline, PipelineReport, ProgressSink, PublishOutcome};
use crate::upload::Credential;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {0} has not completed")]
    NotComplete(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub message: String,
    pub current: usize,
    pub total: usize,
}

/// Snapshot of one submitted job. `report` is set once the job completes,
/// `cause` once it fails; both stay `None` while it runs.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    #[serde(rename = "job_id")]
    pub id: String,
    pub source_url: String,
    pub status: JobStatus,
    pub progress: Progress,
    pub report: Option<PipelineReport>,
    #[serde(rename = "error")]
    pub cause: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

type JobTable = Arc<RwLock<HashMap<String, JobRecord>>>;

/// In-memory table of jobs plus the pipeline that runs them. Records live
/// for the lifetime of the process; a restart forgets them, but the
/// artifact cache makes re-submission of the same release cheap.
#[derive(Clone)]
pub struct JobRegistry {
    pipeline: Arc<Pipeline>,
    jobs: JobTable,
}

impl JobRegistry {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a job and spawn it on the runtime. Returns immediately with
    /// the job id; the record starts as `pending` and the spawned task moves
    /// it forward from there.
    pub fn submit(&self, source_url: String, credential: Credential) -> String {
        let id = new_job_id();
        let record = JobRecord {
            id: id.clone(),
            source_url: source_url.clone(),
            status: JobStatus::Pending,
            progress: Progress {
                message: "queued".to_string(),
                current: 0,
                total: 0,
            },
            report: None,
            cause: None,
            submitted_at: Utc::now(),
            finished_at: None,
        };
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), record);
        info!(job_id = %id, source_url = %source_url, "job submitted");

        let registry = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            registry.run_job(job_id, source_url, credential).await;
        });
        id
    }

    pub fn snapshot(&self, id: &str) -> Option<JobRecord> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Flip a completed job's videos and playlist to public.
    pub async fn publish(
        &self,
        id: &str,
        credential: &Credential,
    ) -> Result<PublishOutcome, JobError> {
        let record = self
            .snapshot(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        let report = match (&record.status, &record.report) {
            (JobStatus::Complete, Some(report)) => report.clone(),
            _ => return Err(JobError::NotComplete(id.to_string())),
        };
        Ok(self.pipeline.publish(credential, &report).await)
    }

    async fn run_job(&self, id: String, source_url: String, credential: Credential) {
        self.transition(&id, |record| {
            record.status = JobStatus::Running;
            record.progress.message = "starting".to_string();
        });

        let sink = RegistrySink {
            jobs: self.jobs.clone(),
            id: id.clone(),
        };
        let outcome = AssertUnwindSafe(self.pipeline.run(&source_url, &credential, &sink))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(report)) => {
                info!(job_id = %id, playlist = %report.playlist_id, "job complete");
                self.transition(&id, |record| {
                    record.status = JobStatus::Complete;
                    record.progress.message = "complete".to_string();
                    record.report = Some(report);
                    record.finished_at = Some(Utc::now());
                });
            }
            Ok(Err(err)) => {
                error!(job_id = %id, error = %err, "job failed");
                self.transition(&id, |record| {
                    record.status = JobStatus::Failed;
                    record.cause = Some(err.to_string());
                    record.finished_at = Some(Utc::now());
                });
            }
            Err(_) => {
                error!(job_id = %id, "job panicked");
                self.transition(&id, |record| {
                    record.status = JobStatus::Failed;
                    record.cause = Some("internal error".to_string());
                    record.finished_at = Some(Utc::now());
                });
            }
        }
    }

    fn transition(&self, id: &str, apply: impl FnOnce(&mut JobRecord)) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = jobs.get_mut(id) {
            apply(record);
        }
    }
}

/// Writes pipeline progress into the job table as the job advances.
struct RegistrySink {
    jobs: JobTable,
    id: String,
}

impl ProgressSink for RegistrySink {
    fn update(&self, message: &str, current: usize, total: usize) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = jobs.get_mut(&self.id) {
            record.progress = Progress {
                message: message.to_string(),
                current,
                total,
            };
        }
    }
}

fn new_job_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
