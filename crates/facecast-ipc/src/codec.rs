//! Length-prefixed JSON framing.
//!
//! Every frame is a 4-byte little-endian payload length followed by exactly
//! that many bytes of UTF-8 JSON. Both directions use the same framing.

use crate::error::IpcError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Writes one frame and flushes.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_frame: usize) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(IpcError::Framing("refusing to send an empty frame".to_string()));
    }
    if payload.len() > max_frame {
        return Err(IpcError::Framing(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            payload.len(),
            max_frame
        )));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| IpcError::Framing(format!("frame of {} bytes is too large", payload.len())))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await.map_err(write_error)?;
    writer.flush().await.map_err(write_error)?;
    Ok(())
}

/// Reads one frame, rejecting zero or oversized lengths before allocating.
pub async fn read_frame<R>(reader: &mut R, max_frame: usize) -> Result<Vec<u8>, IpcError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(read_error)?;
    let len = u32::from_le_bytes(header) as usize;

    if len == 0 {
        return Err(IpcError::Framing("received a zero-length frame".to_string()));
    }
    if len > max_frame {
        return Err(IpcError::Framing(format!(
            "declared frame length {len} exceeds limit of {max_frame} bytes"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(read_error)?;
    Ok(payload)
}

/// Serializes `message` as JSON and writes it as one frame.
pub async fn write_message<W, T>(writer: &mut W, message: &T, max_frame: usize) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload, max_frame).await
}

/// Reads one frame and decodes it as JSON.
///
/// Invalid JSON is a framing error: the peer is not speaking the protocol.
pub async fn read_message<R, T>(reader: &mut R, max_frame: usize) -> Result<T, IpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let payload = read_frame(reader, max_frame).await?;
    serde_json::from_slice(&payload).map_err(|e| IpcError::Framing(format!("invalid JSON payload: {e}")))
}

fn read_error(err: std::io::Error) -> IpcError {
    match err.kind() {
        ErrorKind::UnexpectedEof => IpcError::Framing("connection closed mid-frame".to_string()),
        _ => IpcError::Unavailable(err.to_string()),
    }
}

fn write_error(err: std::io::Error) -> IpcError {
    IpcError::Unavailable(err.to_string())
}
