//! Framed socket protocol server.

use crate::render::render;
use facecast_ipc::codec::{read_message, write_message, DEFAULT_MAX_FRAME};
use facecast_ipc::{WireRequest, WireResponse};
use std::path::Path;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

pub async fn serve(listener: TcpListener, delay: Duration) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(%peer, "connection accepted");
        tokio::spawn(async move {
            handle_connection(stream, delay).await;
            tracing::debug!(%peer, "connection closed");
        });
    }
}

/// Answers requests on one connection until the peer hangs up or sends
/// something unreadable.
async fn handle_connection(mut stream: TcpStream, delay: Duration) {
    loop {
        let request: WireRequest = match read_message(&mut stream, DEFAULT_MAX_FRAME).await {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "stopped reading requests");
                return;
            }
        };
        let response = match render(
            Path::new(&request.audio_path),
            Path::new(&request.output_path),
            delay,
        )
        .await
        {
            Ok(_) => {
                tracing::info!(
                    template_id = %request.template_id,
                    session_id = request.session_id.as_deref().unwrap_or("-"),
                    segment_index = request.segment_index,
                    is_final = request.is_final,
                    output = %request.output_path,
                    "rendered"
                );
                WireResponse::ok(request.output_path)
            }
            Err(e) => {
                tracing::warn!(audio = %request.audio_path, error = %e, "render failed");
                WireResponse::err(format!("render failed: {e}"))
            }
        };
        if let Err(e) = write_message(&mut stream, &response, DEFAULT_MAX_FRAME).await {
            tracing::debug!(error = %e, "failed to write response");
            return;
        }
    }
}
