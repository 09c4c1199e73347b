use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use tapecast_core::{parse_identifier, preview_with_durations, Credential, JobRecord};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub source_url: String,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Dry run: resolve the release and answer with the exact titles a real
/// job would produce, without downloading or uploading anything.
pub async fn preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ProcessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    bearer_token(&headers)?;
    validate_source_url(&request.source_url)?;
    let release = state.source.extract_metadata(&request.source_url).await?;
    let report = preview_with_durations(&release, state.prober.as_ref()).await;
    Ok(Json(report))
}

pub async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ProcessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let credential = bearer_token(&headers)?;
    validate_source_url(&request.source_url)?;
    let job_id = state.registry.submit(request.source_url, credential);
    info!(job_id, "accepted processing job");
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let record = state
        .registry
        .snapshot(&id)
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    Ok(Json(record))
}

pub async fn publish(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let credential = bearer_token(&headers)?;
    let outcome = state.registry.publish(&id, &credential).await?;
    info!(
        job_id = %id,
        videos = outcome.videos_made_public,
        playlist = outcome.playlist_updated,
        "publish pass finished"
    );
    Ok(Json(outcome))
}

/// The caller supplies an already-authorized upload token; the daemon never
/// performs OAuth itself.
fn bearer_token(headers: &HeaderMap) -> Result<Credential, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let token = value.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;
    if token.trim().is_empty() {
        return Err(ApiError::Unauthorized);
    }
    Ok(Credential::new(token.trim()))
}

fn validate_source_url(source_url: &str) -> Result<(), ApiError> {
    if parse_identifier(source_url).is_none() {
        return Err(ApiError::BadRequest(format!(
            "source_url must point at an archive.org details page, got {source_url}"
        )));
    }
    Ok(())
}
