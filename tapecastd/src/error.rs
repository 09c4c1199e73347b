use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use tapecast_core::{JobError, ScrapeError};

/// API-surface error. Every variant maps to one HTTP status so handlers can
/// lean on `?` and still answer with the right code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or malformed bearer token")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    UpstreamData(String),
    #[error("{0}")]
    UpstreamUnavailable(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UpstreamData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<ScrapeError> for ApiError {
    fn from(error: ScrapeError) -> Self {
        match error {
            ScrapeError::UnsupportedUrl(_) => ApiError::BadRequest(error.to_string()),
            ScrapeError::NoTracks(_) | ScrapeError::NoAudio(_) => {
                ApiError::UpstreamData(error.to_string())
            }
            ScrapeError::Network(_) | ScrapeError::Malformed(_) => {
                ApiError::UpstreamUnavailable(error.to_string())
            }
        }
    }
}

impl From<JobError> for ApiError {
    fn from(error: JobError) -> Self {
        match error {
            JobError::NotFound(_) => ApiError::NotFound(error.to_string()),
            JobError::NotComplete(_) => ApiError::Conflict(error.to_string()),
        }
    }
}
