use facecast_dispatch::DispatchError;
use std::time::Duration;
use thiserror::Error;

/// Failure of one external collaborator call.
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("collaborator failed: {0}")]
    Failed(String),

    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Terminal failure of a pipeline run or a conversation turn.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("upstream failed: {0}")]
    Upstream(String),

    #[error("cancelled")]
    Cancelled,

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error(transparent)]
    Dispatch(DispatchError),
}

impl From<DispatchError> for PipelineError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownSession(id) => PipelineError::UnknownSession(id),
            other => PipelineError::Dispatch(other),
        }
    }
}

impl From<CollaboratorError> for PipelineError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Dispatch(e) => e.into(),
            other => PipelineError::Upstream(other.to_string()),
        }
    }
}
