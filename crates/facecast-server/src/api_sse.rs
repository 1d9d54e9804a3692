//! SSE handlers for conversation turns and session events.

use crate::api::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    response::{
        sse::{Event, KeepAlive},
        Json, Sse,
    },
};
use facecast_pipeline::PipelineError;
use facecast_types::StreamSegment;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Maximum length of a single prompt, in bytes.
const MAX_PROMPT_BYTES: usize = 8 * 1024;

#[derive(Debug, Deserialize)]
pub struct SayRequest {
    pub text: String,
}

fn segment_event(segment: &StreamSegment) -> Option<Event> {
    match serde_json::to_string(segment) {
        Ok(data) => Some(Event::default().event("segment").data(data)),
        Err(e) => {
            tracing::error!("failed to serialize segment: {}", e);
            None
        }
    }
}

fn error_event(err: &PipelineError) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": err.to_string() }).to_string())
}

/// Handler for `POST /api/sessions/{sessionId}/say`.
///
/// Streams `segment` events in order as each clip is rendered, then a single
/// `done` or `error` event. Disconnecting cancels the turn.
pub async fn say_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<SayRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let text = payload.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    if text.len() > MAX_PROMPT_BYTES {
        return Err(ApiError::BadRequest(format!(
            "text exceeds {MAX_PROMPT_BYTES} bytes"
        )));
    }

    let cancel = CancellationToken::new();
    let mut segments = state
        .coordinator
        .say_stream(&session_id, text, cancel.clone())
        .await?;

    let (tx, rx) = mpsc::channel::<Event>(16);
    tokio::spawn(async move {
        let mut delivered = 0usize;
        loop {
            let item = tokio::select! {
                () = tx.closed() => {
                    tracing::debug!(session_id, delivered, "client went away, cancelling turn");
                    cancel.cancel();
                    return;
                }
                item = segments.next() => item,
            };
            let event = match item {
                Some(Ok(segment)) => {
                    delivered += 1;
                    match segment_event(&segment) {
                        Some(event) => event,
                        None => continue,
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(session_id, delivered, error = %e, "turn failed");
                    let _ = tx.send(error_event(&e)).await;
                    return;
                }
                None => {
                    let done = json!({ "segments": delivered }).to_string();
                    let _ = tx.send(Event::default().event("done").data(done)).await;
                    return;
                }
            };
            if tx.send(event).await.is_err() {
                cancel.cancel();
                return;
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Handler for `GET /api/sessions/{sessionId}/events`.
///
/// Streams every conversation event broadcast for the session.
pub async fn events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state.coordinator.subscribe(&session_id)?;
    let stream = BroadcastStream::new(rx);

    let mapped_stream = stream.filter_map(move |result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(data) => Some(Ok(Event::default().data(data))),
            Err(e) => {
                tracing::error!("failed to serialize conversation event: {}", e);
                None
            }
        },
        Err(lagged) => {
            tracing::warn!(
                error = %lagged,
                "session event stream lagged; events were dropped for this subscriber"
            );
            None
        }
    });

    Ok(Sse::new(mapped_stream).keep_alive(KeepAlive::default()))
}
