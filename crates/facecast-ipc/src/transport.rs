use crate::error::IpcError;
use async_trait::async_trait;
use facecast_types::{InferenceJob, InferenceResult};

/// A way of getting one inference job executed by a worker.
///
/// Implementations report worker-side rejections as [`IpcError::Worker`] and
/// everything else that stops a request from completing as a transport error.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    /// Short name used in logs and status reports.
    fn name(&self) -> &'static str;

    /// Checks that the worker is reachable and speaking the protocol.
    async fn probe(&self) -> Result<(), IpcError>;

    /// Runs one job to completion.
    async fn execute(&self, job: &InferenceJob) -> Result<InferenceResult, IpcError>;

    /// Prepares worker-side state for a session.
    async fn open_session(&self, _session_id: &str, _template_id: &str) -> Result<(), IpcError> {
        Ok(())
    }

    /// Releases worker-side state for a session. Must tolerate unknown ids.
    async fn close_session(&self, _session_id: &str) -> Result<(), IpcError> {
        Ok(())
    }
}
