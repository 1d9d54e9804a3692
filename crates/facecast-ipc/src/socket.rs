use crate::codec::{read_message, write_message, DEFAULT_MAX_FRAME};
use crate::error::IpcError;
use crate::transport::InferenceTransport;
use crate::wire::{WireRequest, WireResponse};
use async_trait::async_trait;
use facecast_types::{InferenceJob, InferenceResult};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Connection settings for [`SocketTransport`].
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// `host:port` of the worker.
    pub address: String,
    /// Upper bound on one request/response round trip, connect included.
    pub request_timeout: Duration,
    /// Upper bound on establishing a connection.
    pub connect_timeout: Duration,
    pub max_frame: usize,
}

impl SocketConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(2),
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Framed-socket client holding one persistent connection.
///
/// The connection sits behind a mutex, so there is never more than one
/// outstanding request on it. Any failure drops the connection and the next
/// call reconnects.
#[derive(Debug)]
pub struct SocketTransport {
    config: SocketConfig,
    conn: Mutex<Option<TcpStream>>,
}

impl SocketTransport {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Sends one request and waits for its response.
    pub async fn round_trip(&self, request: &WireRequest) -> Result<WireResponse, IpcError> {
        let mut conn = self.conn.lock().await;
        let outcome = tokio::time::timeout(self.config.request_timeout, self.exchange(&mut conn, request)).await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                *conn = None;
                Err(e)
            }
            Err(_) => {
                *conn = None;
                warn!(address = %self.config.address, timeout = ?self.config.request_timeout, "worker request timed out");
                Err(IpcError::Timeout(self.config.request_timeout))
            }
        }
    }

    async fn exchange(&self, slot: &mut Option<TcpStream>, request: &WireRequest) -> Result<WireResponse, IpcError> {
        if slot.is_none() {
            *slot = Some(self.connect().await?);
        }
        let Some(stream) = slot.as_mut() else {
            return Err(IpcError::Unavailable("no connection".to_string()));
        };
        write_message(stream, request, self.config.max_frame).await?;
        read_message(stream, self.config.max_frame).await
    }

    async fn connect(&self) -> Result<TcpStream, IpcError> {
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&self.config.address))
            .await
            .map_err(|_| IpcError::Timeout(self.config.connect_timeout))?
            .map_err(|e| IpcError::Unavailable(format!("{}: {e}", self.config.address)))?;
        let _ = stream.set_nodelay(true);
        debug!(address = %self.config.address, "connected to worker");
        Ok(stream)
    }
}

#[async_trait]
impl InferenceTransport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    /// Opens a fresh connection and keeps it for the next request.
    async fn probe(&self) -> Result<(), IpcError> {
        let stream = self.connect().await?;
        *self.conn.lock().await = Some(stream);
        Ok(())
    }

    async fn execute(&self, job: &InferenceJob) -> Result<InferenceResult, IpcError> {
        let started = Instant::now();
        let response = self.round_trip(&WireRequest::from(job)).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if !response.success {
            return Err(IpcError::Worker(
                response.error.unwrap_or_else(|| "worker reported failure".to_string()),
            ));
        }
        let output = response
            .output_path
            .map(PathBuf::from)
            .unwrap_or_else(|| job.output_path.clone());
        debug!(template_id = %job.template_id, elapsed_ms, "socket job completed");
        Ok(InferenceResult::succeeded(output, elapsed_ms))
    }
}
