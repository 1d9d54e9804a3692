//! Facecast server library logic.

pub mod api;
pub mod api_sse;
pub mod background;
pub mod config;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    routing::{delete, get, post},
    Json, Router,
};
use facecast_pipeline::ConversationCoordinator;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Owns sessions and runs conversation turns.
    pub coordinator: Arc<ConversationCoordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<ConversationCoordinator>) -> Self {
        Self { coordinator }
    }
}

/// Maximum request body size (1 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Health check handler.
///
/// Reports the execution mode and, when a worker is supervised, its status.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let selector = state.coordinator.selector();
    let worker = match selector.supervisor() {
        Some(supervisor) => supervisor.status().await,
        None => None,
    };
    let stats = selector.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": selector.mode().as_str(),
        "worker": worker,
        "sessions": state.coordinator.session_count(),
        "jobs": {
            "persistent": stats.persistent_jobs,
            "traditional": stats.traditional_jobs,
            "fallbacks": stats.fallbacks,
        },
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(api::create_session_handler))
        .route("/api/sessions/{sessionId}", delete(api::end_session_handler))
        .route("/api/sessions/{sessionId}/say", post(api_sse::say_handler))
        .route("/api/sessions/{sessionId}/events", get(api_sse::events_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
