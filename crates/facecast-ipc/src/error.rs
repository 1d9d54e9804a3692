use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("worker unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("unexpected HTTP response: {0}")]
    Http(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IpcError {
    /// Whether the failure means the worker could not be reached or spoke
    /// garbage, as opposed to the worker rejecting the job.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IpcError::Unavailable(_) | IpcError::Timeout(_) | IpcError::Framing(_)
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            IpcError::Timeout(timeout)
        } else if err.is_connect() || err.is_request() {
            IpcError::Unavailable(err.to_string())
        } else if err.is_decode() || err.is_body() {
            IpcError::Framing(err.to_string())
        } else {
            IpcError::Http(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification() {
        assert!(IpcError::Unavailable("refused".into()).is_transport());
        assert!(IpcError::Timeout(Duration::from_secs(1)).is_transport());
        assert!(IpcError::Framing("short read".into()).is_transport());
        assert!(!IpcError::Worker("bad template".into()).is_transport());
        assert!(!IpcError::Http("418".into()).is_transport());
    }
}
