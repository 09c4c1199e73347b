use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use tapecast_core::{JobRegistry, Prober, ReleaseSource};

use crate::routes;

#[derive(Clone)]
pub struct AppState {
    pub registry: JobRegistry,
    pub source: Arc<dyn ReleaseSource>,
    pub prober: Arc<dyn Prober>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/preview", post(routes::preview))
        .route("/api/process", post(routes::process))
        .route("/api/job/{id}", get(routes::job_status))
        .route("/api/job/{id}/publish", post(routes::publish))
        .with_state(state)
}
