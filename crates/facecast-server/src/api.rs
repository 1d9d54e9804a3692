//! Session lifecycle handlers.

use crate::AppState;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use facecast_dispatch::DispatchError;
use facecast_pipeline::PipelineError;
use facecast_types::Session;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Maximum length for a template ID.
const MAX_TEMPLATE_ID_LEN: usize = 128;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("upstream failure: {0}")]
    BadGateway(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UnknownSession(id) => ApiError::NotFound(format!("session {id}")),
            PipelineError::Dispatch(DispatchError::Unavailable(msg)) => ApiError::Unavailable(msg),
            PipelineError::Dispatch(DispatchError::UnknownSession(id)) => {
                ApiError::NotFound(format!("session {id}"))
            }
            PipelineError::Dispatch(DispatchError::Worker(msg)) | PipelineError::Upstream(msg) => {
                ApiError::BadGateway(msg)
            }
            PipelineError::Cancelled => ApiError::InternalServerError("turn cancelled".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub template_id: String,
}

pub(crate) fn validate_template_id(template_id: &str) -> Result<(), ApiError> {
    if template_id.trim().is_empty() {
        return Err(ApiError::BadRequest("template_id must not be empty".to_string()));
    }
    if template_id.len() > MAX_TEMPLATE_ID_LEN {
        return Err(ApiError::BadRequest(format!(
            "template_id exceeds {MAX_TEMPLATE_ID_LEN} characters"
        )));
    }
    if template_id.contains(['/', '\\']) || template_id.contains("..") {
        return Err(ApiError::BadRequest("template_id must be a plain name".to_string()));
    }
    Ok(())
}

/// Handler for `POST /api/sessions`.
pub async fn create_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    validate_template_id(&payload.template_id)?;
    let session = state
        .coordinator
        .start_session(&payload.template_id)
        .await
        .map_err(|e| {
            tracing::warn!(template_id = %payload.template_id, error = %e, "failed to open session");
            ApiError::from(e)
        })?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Handler for `DELETE /api/sessions/{sessionId}`.
///
/// Always answers `204 No Content`, including for sessions that are already
/// gone.
pub async fn end_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> StatusCode {
    let known = state.coordinator.end_session(&session_id).await;
    if !known {
        tracing::debug!(session_id, "end requested for unknown session");
    }
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_ids_are_plain_names() {
        assert!(validate_template_id("anna").is_ok());
        assert!(validate_template_id("  ").is_err());
        assert!(validate_template_id("../etc").is_err());
        assert!(validate_template_id("a/b").is_err());
        assert!(validate_template_id(&"x".repeat(MAX_TEMPLATE_ID_LEN + 1)).is_err());
    }

    #[test]
    fn pipeline_errors_map_to_statuses() {
        let status = |e: PipelineError| ApiError::from(e).into_response().status();
        assert_eq!(status(PipelineError::UnknownSession("s".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(PipelineError::Dispatch(DispatchError::Unavailable("down".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(PipelineError::Dispatch(DispatchError::Worker("bad".into()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status(PipelineError::Upstream("llm".into())), StatusCode::BAD_GATEWAY);
    }
}
