use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Neither execution path could reach a worker.
    #[error("no worker available: {0}")]
    Unavailable(String),

    /// The job was rejected after the fallback attempt.
    #[error("worker failed the job: {0}")]
    Worker(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),
}
