//! HTTP control protocol server.

use crate::render::render;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use facecast_ipc::wire::{
    HealthReport, PreprocessRequest, ProcessSegmentRequest, ProcessSegmentResponse, StartSessionRequest,
    StartSessionResponse,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug)]
pub struct ControlState {
    /// Live sessions and their template.
    sessions: Mutex<HashMap<String, String>>,
    /// Clips go here when a request names no output path.
    scratch_dir: PathBuf,
    delay: Duration,
}

impl ControlState {
    pub fn new(scratch_dir: PathBuf, delay: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            scratch_dir,
            delay,
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn health(State(state): State<Arc<ControlState>>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok".to_string(),
        active_sessions: state.sessions().len(),
    })
}

async fn initialize() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn preprocess_template(Json(body): Json<PreprocessRequest>) -> Response {
    if body.template_id.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "template_id must not be empty");
    }
    tracing::info!(template_id = %body.template_id, image = %body.image_path, "template preprocessed");
    Json(json!({ "status": "ok" })).into_response()
}

async fn start_session(
    State(state): State<Arc<ControlState>>,
    Json(body): Json<StartSessionRequest>,
) -> Json<StartSessionResponse> {
    state
        .sessions()
        .insert(body.session_id.clone(), body.template_id.clone());
    tracing::info!(session_id = %body.session_id, template_id = %body.template_id, "session started");
    Json(StartSessionResponse {
        session_id: body.session_id,
    })
}

async fn process_segment(
    State(state): State<Arc<ControlState>>,
    Json(body): Json<ProcessSegmentRequest>,
) -> Response {
    if !state.sessions().contains_key(&body.session_id) {
        return error(StatusCode::NOT_FOUND, format!("no such session: {}", body.session_id));
    }
    let output = body.output_path.map(PathBuf::from).unwrap_or_else(|| {
        state
            .scratch_dir
            .join(format!("{}-{:04}.mp4", body.session_id, body.segment_index))
    });
    match render(&PathBuf::from(&body.audio_path), &output, state.delay).await {
        Ok(_) => {
            tracing::info!(
                session_id = %body.session_id,
                segment_index = body.segment_index,
                is_final = body.is_final,
                "segment rendered"
            );
            Json(ProcessSegmentResponse {
                video_path: output.to_string_lossy().into_owned(),
            })
            .into_response()
        }
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("render failed: {e}")),
    }
}

async fn end_session(State(state): State<Arc<ControlState>>, Path(session_id): Path<String>) -> Response {
    if state.sessions().remove(&session_id).is_none() {
        return error(StatusCode::NOT_FOUND, format!("no such session: {session_id}"));
    }
    tracing::info!(session_id, "session ended");
    Json(json!({ "status": "ended" })).into_response()
}

pub fn router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/initialize", post(initialize))
        .route("/preprocess_template", post(preprocess_template))
        .route("/start_session", post(start_session))
        .route("/process_segment", post(process_segment))
        .route("/end_session/{sessionId}", post(end_session))
        .with_state(state)
}
