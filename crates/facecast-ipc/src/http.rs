//! HTTP control protocol for workers that keep per-session state.

use crate::error::IpcError;
use crate::transport::InferenceTransport;
use crate::wire::{
    ErrorBody, HealthReport, PreprocessRequest, ProcessSegmentRequest, ProcessSegmentResponse,
    StartSessionRequest, StartSessionResponse,
};
use async_trait::async_trait;
use facecast_types::{InferenceJob, InferenceResult};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Typed client for the worker's JSON control endpoints.
#[derive(Debug)]
pub struct HttpControlClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpControlClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn initialize(&self) -> Result<(), IpcError> {
        self.post_unit("/initialize", &serde_json::json!({})).await
    }

    pub async fn preprocess_template(&self, template_id: &str, image_path: &Path) -> Result<(), IpcError> {
        let body = PreprocessRequest {
            template_id: template_id.to_string(),
            image_path: image_path.to_string_lossy().into_owned(),
        };
        self.post_unit("/preprocess_template", &body).await
    }

    /// Starts a session and returns the id the worker assigned.
    pub async fn start_session(&self, session_id: &str, template_id: &str) -> Result<String, IpcError> {
        let body = StartSessionRequest {
            session_id: session_id.to_string(),
            template_id: template_id.to_string(),
        };
        let response: StartSessionResponse = self.post_json("/start_session", &body).await?;
        Ok(response.session_id)
    }

    pub async fn process_segment(&self, request: &ProcessSegmentRequest) -> Result<PathBuf, IpcError> {
        let response: ProcessSegmentResponse = self.post_json("/process_segment", request).await?;
        Ok(PathBuf::from(response.video_path))
    }

    /// Ends a session. Ending an unknown or already-ended session succeeds:
    /// the worker answers 404 for those.
    pub async fn end_session(&self, session_id: &str) -> Result<(), IpcError> {
        let url = format!("{}/end_session/{}", self.base_url, session_id);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| IpcError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(session_id, "worker did not know the session");
            return Ok(());
        }
        if status.is_success() {
            return Ok(());
        }
        Err(error_from_response(response).await)
    }

    pub async fn health(&self) -> Result<HealthReport, IpcError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| IpcError::from_reqwest(e, self.timeout))?;
        self.decode(response).await
    }

    /// Starts a session and wraps it in a guard that ends it on drop.
    pub async fn open(self: &Arc<Self>, session_id: &str, template_id: &str) -> Result<HttpSession, IpcError> {
        let id = self.start_session(session_id, template_id).await?;
        Ok(HttpSession {
            client: Arc::clone(self),
            session_id: id,
            finished: false,
        })
    }

    async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), IpcError> {
        let _: serde_json::Value = self.post_json(path, body).await?;
        Ok(())
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, IpcError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| IpcError::from_reqwest(e, self.timeout))?;
        self.decode(response).await
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T, IpcError> {
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| IpcError::from_reqwest(e, self.timeout))?;
        serde_json::from_slice(&bytes).map_err(|e| IpcError::Framing(format!("invalid JSON response: {e}")))
    }
}

/// A worker reporting `{"error": ...}` rejected the request; anything else is
/// an unexpected response.
async fn error_from_response(response: reqwest::Response) -> IpcError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => IpcError::Worker(body.error),
        Err(_) => IpcError::Http(format!("{status}: {}", text.trim())),
    }
}

/// A started worker session.
///
/// Call [`HttpSession::finish`] to end it. A guard dropped without `finish`
/// (early return, cancelled task) ends the session on the runtime instead.
#[derive(Debug)]
pub struct HttpSession {
    client: Arc<HttpControlClient>,
    session_id: String,
    finished: bool,
}

impl HttpSession {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub async fn process(
        &self,
        audio_path: &Path,
        output_path: Option<&Path>,
        segment_index: u64,
        is_final: bool,
    ) -> Result<PathBuf, IpcError> {
        let request = ProcessSegmentRequest {
            session_id: self.session_id.clone(),
            audio_path: audio_path.to_string_lossy().into_owned(),
            segment_index,
            is_final,
            output_path: output_path.map(|p| p.to_string_lossy().into_owned()),
        };
        self.client.process_segment(&request).await
    }

    pub async fn finish(mut self) -> Result<(), IpcError> {
        self.finished = true;
        self.client.end_session(&self.session_id).await
    }
}

impl Drop for HttpSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let client = Arc::clone(&self.client);
        let session_id = std::mem::take(&mut self.session_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.end_session(&session_id).await {
                        warn!(session_id, error = %e, "failed to end dropped session");
                    }
                });
            }
            Err(_) => warn!(session_id, "session dropped outside a runtime; not ended"),
        }
    }
}

/// [`InferenceTransport`] over the HTTP control protocol.
///
/// Sessions opened through the transport are held as guards. Jobs without a
/// matching open session run in a throwaway single-segment session.
#[derive(Debug)]
pub struct HttpTransport {
    client: Arc<HttpControlClient>,
    template_root: Option<PathBuf>,
    sessions: Mutex<HashMap<String, HttpSession>>,
    initialized: Mutex<bool>,
}

impl HttpTransport {
    pub fn new(client: HttpControlClient) -> Self {
        Self {
            client: Arc::new(client),
            template_root: None,
            sessions: Mutex::new(HashMap::new()),
            initialized: Mutex::new(false),
        }
    }

    /// Directory holding template images; when set, templates are
    /// preprocessed as sessions open.
    pub fn with_template_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.template_root = Some(root.into());
        self
    }

    pub fn client(&self) -> &Arc<HttpControlClient> {
        &self.client
    }

    pub async fn open_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn ensure_initialized(&self) -> Result<(), IpcError> {
        let mut initialized = self.initialized.lock().await;
        if !*initialized {
            self.client.initialize().await?;
            *initialized = true;
            info!(base_url = %self.client.base_url(), "worker initialized");
        }
        Ok(())
    }
}

#[async_trait]
impl InferenceTransport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn probe(&self) -> Result<(), IpcError> {
        let report = self.client.health().await?;
        if report.status != "ok" {
            return Err(IpcError::Unavailable(format!("worker status is {}", report.status)));
        }
        self.ensure_initialized().await
    }

    async fn execute(&self, job: &InferenceJob) -> Result<InferenceResult, IpcError> {
        let started = Instant::now();
        let output = Some(job.output_path.as_path()).filter(|p| !p.as_os_str().is_empty());

        if let Some(binding) = &job.session {
            let sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get(&binding.session_id) {
                let video = session
                    .process(&job.audio_path, output, binding.segment_index, binding.is_final)
                    .await?;
                return Ok(InferenceResult::succeeded(video, started.elapsed().as_millis() as u64));
            }
        }

        let temp_id = format!("job-{}", uuid::Uuid::new_v4());
        let session = self.client.open(&temp_id, &job.template_id).await?;
        let video = session.process(&job.audio_path, output, 0, true).await?;
        session.finish().await?;
        Ok(InferenceResult::succeeded(video, started.elapsed().as_millis() as u64))
    }

    async fn open_session(&self, session_id: &str, template_id: &str) -> Result<(), IpcError> {
        self.ensure_initialized().await?;
        if let Some(root) = &self.template_root {
            self.client
                .preprocess_template(template_id, &root.join(template_id))
                .await?;
        }
        let session = self.client.open(session_id, template_id).await?;
        if session.id() != session_id {
            debug!(requested = session_id, assigned = session.id(), "worker renamed session");
        }
        self.sessions.lock().await.insert(session_id.to_string(), session);
        Ok(())
    }

    async fn close_session(&self, session_id: &str) -> Result<(), IpcError> {
        let guard = self.sessions.lock().await.remove(session_id);
        match guard {
            Some(session) => session.finish().await,
            None => self.client.end_session(session_id).await,
        }
    }
}
