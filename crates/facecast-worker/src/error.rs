use thiserror::Error;

/// Errors raised while launching or stopping a worker process.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn worker {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker exited before listening on port {port} ({status})")]
    ExitedEarly { port: u16, status: String },

    #[error("worker did not open port {port} within {waited_ms} ms")]
    PortNeverOpened { port: u16, waited_ms: u64 },

    #[error("port {0} is already owned by another supervisor")]
    PortClaimed(u16),

    #[error("process inspection failed: {0}")]
    Inspect(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
