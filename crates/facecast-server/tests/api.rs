use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use facecast_dispatch::{DispatchConfig, ModeSelector};
use facecast_ipc::{InferenceTransport, IpcError};
use facecast_pipeline::{
    CollaboratorError, ConversationCoordinator, PipelineConfig, ReplyGenerator, SelectorVideoGenerator,
    SpeechSynthesizer, StreamingPipeline, TextStream,
};
use facecast_server::{app, AppState};
use facecast_types::{InferenceJob, InferenceResult, Session};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

struct Loopback;

#[async_trait]
impl InferenceTransport for Loopback {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn probe(&self) -> Result<(), IpcError> {
        Ok(())
    }

    async fn execute(&self, job: &InferenceJob) -> Result<InferenceResult, IpcError> {
        Ok(InferenceResult::succeeded(&job.output_path, 1))
    }
}

struct Echo;

#[async_trait]
impl ReplyGenerator for Echo {
    async fn stream_reply(&self, _session: &Session, prompt: &str) -> Result<TextStream, CollaboratorError> {
        let words: Vec<Result<String, CollaboratorError>> =
            prompt.split_inclusive(' ').map(|w| Ok(w.to_string())).collect();
        Ok(Box::pin(futures_util::stream::iter(words)))
    }
}

struct Synth;

#[async_trait]
impl SpeechSynthesizer for Synth {
    async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<PathBuf, CollaboratorError> {
        Ok(PathBuf::from(format!("/audio/{}.wav", text.len())))
    }
}

async fn test_app(dir: &tempfile::TempDir) -> Router {
    let selector = Arc::new(ModeSelector::new(
        Arc::new(Loopback),
        Arc::new(Loopback),
        DispatchConfig::default(),
    ));
    selector.initialize().await;
    let config = PipelineConfig {
        output_dir: dir.path().to_path_buf(),
        ..PipelineConfig::default()
    };
    let video = Arc::new(SelectorVideoGenerator::new(selector.clone(), &config));
    let pipeline = Arc::new(StreamingPipeline::new(Arc::new(Synth), video, config));
    let coordinator = ConversationCoordinator::new(selector, pipeline, Arc::new(Echo));
    app(AppState::new(Arc::new(coordinator)))
}

fn json_request(method: Method, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn create_session(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(json_request(Method::POST, "/api/sessions", r#"{"template_id":"anna"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["template_id"], "anna");
    json["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_mode() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], "0.0.1");
    assert_eq!(json["mode"], "persistent");
    assert!(json["worker"].is_null());
}

#[tokio::test]
async fn sessions_end_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;
    let id = create_session(&app).await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri(format!("/api/sessions/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn say_streams_segments_then_done() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;
    let id = create_session(&app).await;

    let response = app
        .oneshot(json_request(
            Method::POST,
            &format!("/api/sessions/{id}/say"),
            r#"{"text":"Hello there. How are you? Great!"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();
    let events: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("event:"))
        .map(str::trim)
        .collect();
    assert_eq!(events, vec!["segment", "segment", "segment", "done"]);
    assert!(body.contains(r#"{"segments":3}"#));
}

#[tokio::test]
async fn say_to_unknown_session_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;

    let response = app
        .oneshot(json_request(Method::POST, "/api/sessions/missing/say", r#"{"text":"Hi."}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;
    let id = create_session(&app).await;

    let empty_text = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/sessions/{id}/say"),
            r#"{"text":"   "}"#,
        ))
        .await
        .unwrap();
    assert_eq!(empty_text.status(), StatusCode::BAD_REQUEST);

    let bad_template = app
        .clone()
        .oneshot(json_request(Method::POST, "/api/sessions", r#"{"template_id":"../x"}"#))
        .await
        .unwrap();
    assert_eq!(bad_template.status(), StatusCode::BAD_REQUEST);

    let oversized = format!(r#"{{"text":"{}"}}"#, "a".repeat(2 * 1024 * 1024));
    let too_large = app
        .oneshot(json_request(Method::POST, &format!("/api/sessions/{id}/say"), &oversized))
        .await
        .unwrap();
    assert_eq!(too_large.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn events_for_unknown_session_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sessions/missing/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
