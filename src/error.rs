use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("session closed: {0}")]
    Gone(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Gone(msg) => (StatusCode::GONE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("resource not found")]
    NotFound,

    #[error("authentication failed")]
    Unauthorized,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed payload: {0}")]
    Decode(String),

    #[error("request timed out")]
    Timeout,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("Invalid personnel identifier.")]
    InvalidIdentifier(String),

    #[error("No active delivery assignment found for this personnel from your role.")]
    NotFound,

    #[error("Failed to load delivery information. Please try again.")]
    Unavailable(String),
}

impl ResolveError {
    pub fn suggestions(&self, role: &str) -> Vec<String> {
        match self {
            ResolveError::InvalidIdentifier(_) => Vec::new(),
            ResolveError::NotFound | ResolveError::Unavailable(_) => vec![
                "The delivery assignment may have been completed or cancelled".to_string(),
                "The personnel might not have an active assignment from your role".to_string(),
                "There might be a temporary connection issue".to_string(),
                format!("You can only track assignments created by users with your role ({role})"),
            ],
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SurfaceError {
    #[error("layer position unavailable: container has no measured size")]
    Positioning,

    #[error("unknown layer {0}")]
    UnknownLayer(u64),

    #[error("surface disposed")]
    Disposed,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MapError {
    #[error("map temporarily unavailable")]
    Unavailable,

    #[error("map not initialized")]
    NotInitialized,

    #[error("map surface error: {0}")]
    Surface(String),
}

impl From<SurfaceError> for MapError {
    fn from(err: SurfaceError) -> Self {
        match err {
            SurfaceError::Positioning => MapError::Unavailable,
            other => MapError::Surface(other.to_string()),
        }
    }
}
