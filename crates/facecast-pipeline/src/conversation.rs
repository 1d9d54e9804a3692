//! Session-level orchestration of conversation turns.

use crate::collaborators::{ReplyGenerator, SpeechRecognizer};
use crate::error::PipelineError;
use crate::pipeline::{PipelineRequest, SegmentStream, StreamingPipeline};
use facecast_dispatch::ModeSelector;
use facecast_types::{Session, StreamSegment};
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of each session's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Audio buffered per session before an utterance is forced to end.
const MAX_UTTERANCE_BYTES: usize = 10 * 1024 * 1024;

/// Event broadcast to a session's subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    Transcript { session_id: String, text: String },
    Segment { session_id: String, segment: StreamSegment },
    TurnComplete { session_id: String, segments: usize },
    TurnFailed { session_id: String, error: String },
}

/// A chunk of realtime caller audio.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    /// Set on the last frame of an utterance.
    pub end_of_utterance: bool,
}

struct Conversation {
    session: Session,
    events: broadcast::Sender<ConversationEvent>,
    audio: Vec<u8>,
    /// Parent of every turn's token; cancelled when the conversation ends.
    cancel: CancellationToken,
    turns: Vec<JoinHandle<()>>,
}

impl Conversation {
    /// Cancels running turns and waits until none of them can dispatch again.
    async fn stop(self, session_id: &str) {
        self.cancel.cancel();
        for turn in self.turns {
            if let Err(e) = turn.await {
                warn!(session_id, error = %e, "turn task ended abnormally");
            }
        }
    }
}

/// Owns conversation sessions and runs turns through the pipeline.
pub struct ConversationCoordinator {
    selector: Arc<ModeSelector>,
    pipeline: Arc<StreamingPipeline>,
    replies: Arc<dyn ReplyGenerator>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    conversations: StdMutex<HashMap<String, Conversation>>,
}

impl ConversationCoordinator {
    pub fn new(
        selector: Arc<ModeSelector>,
        pipeline: Arc<StreamingPipeline>,
        replies: Arc<dyn ReplyGenerator>,
    ) -> Self {
        Self {
            selector,
            pipeline,
            replies,
            recognizer: None,
            conversations: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn selector(&self) -> &Arc<ModeSelector> {
        &self.selector
    }

    fn conversations(&self) -> std::sync::MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_count(&self) -> usize {
        self.conversations().len()
    }

    /// Opens a session bound to `template_id`.
    pub async fn start_session(&self, template_id: &str) -> Result<Session, PipelineError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = self.selector.open_session(&session_id, template_id).await?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        self.conversations().insert(
            session_id.clone(),
            Conversation {
                session: session.clone(),
                events,
                audio: Vec::new(),
                cancel: CancellationToken::new(),
                turns: Vec::new(),
            },
        );
        info!(session_id, template_id, "conversation started");
        Ok(session)
    }

    pub fn subscribe(&self, session_id: &str) -> Result<broadcast::Receiver<ConversationEvent>, PipelineError> {
        self.conversations()
            .get(session_id)
            .map(|c| c.events.subscribe())
            .ok_or_else(|| PipelineError::UnknownSession(session_id.to_string()))
    }

    fn lookup(&self, session_id: &str) -> Result<(Session, broadcast::Sender<ConversationEvent>), PipelineError> {
        self.conversations()
            .get(session_id)
            .map(|c| (c.session.clone(), c.events.clone()))
            .ok_or_else(|| PipelineError::UnknownSession(session_id.to_string()))
    }

    /// Runs one turn and returns its segments as they are rendered.
    ///
    /// Every item is also broadcast to the session's subscribers, followed by
    /// a `TurnComplete` or `TurnFailed` event.
    pub async fn say_stream(
        &self,
        session_id: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<SegmentStream, PipelineError> {
        let (session, events) = self.lookup(session_id)?;
        let reply = match self.replies.stream_reply(&session, text).await {
            Ok(reply) => reply,
            Err(e) => {
                let _ = events.send(ConversationEvent::TurnFailed {
                    session_id: session_id.to_string(),
                    error: e.to_string(),
                });
                return Err(PipelineError::Upstream(e.to_string()));
            }
        };

        let request = PipelineRequest::new(&session.template_id).with_session(session_id);
        let (tx, rx) = mpsc::unbounded_channel();

        // Spawned under the lock so that `end_session` always sees the turn.
        let mut conversations = self.conversations();
        let conversation = conversations
            .get_mut(session_id)
            .ok_or_else(|| PipelineError::UnknownSession(session_id.to_string()))?;
        conversation.turns.retain(|turn| !turn.is_finished());

        let turn = conversation.cancel.child_token();
        link_cancellation(cancel, turn.clone());
        let segments = self.pipeline.run(request, reply, turn.clone());
        let handle = tokio::spawn(forward_turn(session_id.to_string(), segments, events, tx, turn));
        conversation.turns.push(handle);

        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Runs one turn to completion and returns the number of segments
    /// delivered.
    pub async fn say(&self, session_id: &str, text: &str, cancel: CancellationToken) -> Result<usize, PipelineError> {
        let mut stream = self.say_stream(session_id, text, cancel).await?;
        let mut delivered = 0;
        while let Some(item) = stream.next().await {
            item?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Buffers caller audio; at the end of an utterance, transcribes it and
    /// runs a turn with the transcript.
    ///
    /// Returns `None` when no turn ran: mid-utterance, or nothing was said.
    pub async fn push_audio(
        &self,
        session_id: &str,
        frame: AudioFrame,
        cancel: CancellationToken,
    ) -> Result<Option<usize>, PipelineError> {
        let utterance = {
            let mut conversations = self.conversations();
            let conversation = conversations
                .get_mut(session_id)
                .ok_or_else(|| PipelineError::UnknownSession(session_id.to_string()))?;
            if conversation.audio.len() + frame.data.len() > MAX_UTTERANCE_BYTES {
                warn!(session_id, "utterance too long; discarding buffered audio");
                conversation.audio.clear();
                return Err(PipelineError::Upstream(format!(
                    "utterance exceeds {MAX_UTTERANCE_BYTES} bytes"
                )));
            }
            conversation.audio.extend_from_slice(&frame.data);
            if !frame.end_of_utterance {
                return Ok(None);
            }
            std::mem::take(&mut conversation.audio)
        };

        if utterance.is_empty() {
            return Ok(None);
        }
        let recognizer = self
            .recognizer
            .as_ref()
            .ok_or_else(|| PipelineError::Upstream("no speech recognizer configured".to_string()))?;
        let transcript = recognizer.transcribe(&utterance).await?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            debug!(session_id, bytes = utterance.len(), "utterance had no speech");
            return Ok(None);
        }

        let (_, events) = self.lookup(session_id)?;
        let _ = events.send(ConversationEvent::Transcript {
            session_id: session_id.to_string(),
            text: transcript.to_string(),
        });
        self.say(session_id, transcript, cancel).await.map(Some)
    }

    /// Ends a session. Returns whether it was known.
    ///
    /// Running turns are cancelled and awaited first, so no job for the
    /// session is dispatched once this returns. The worker-side session is
    /// released either way.
    pub async fn end_session(&self, session_id: &str) -> bool {
        self.release(session_id).await.0
    }

    /// Returns whether the conversation and the dispatcher session existed.
    async fn release(&self, session_id: &str) -> (bool, bool) {
        let conversation = self.conversations().remove(session_id);
        let known = conversation.is_some();
        if let Some(conversation) = conversation {
            conversation.stop(session_id).await;
        }
        let released = self.selector.close_session(session_id).await;
        if known || released {
            info!(session_id, "conversation ended");
        }
        (known, released)
    }

    /// Ends every conversation idle for longer than `max_idle`.
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<String> {
        let mut reaped = Vec::new();
        for id in self.selector.idle_sessions(max_idle) {
            if let (_, true) = self.release(&id).await {
                reaped.push(id);
            }
        }
        reaped
    }

    /// Ends every conversation and shuts the dispatcher down.
    pub async fn shutdown(&self) {
        let conversations: Vec<(String, Conversation)> = self.conversations().drain().collect();
        for (session_id, conversation) in conversations {
            conversation.stop(&session_id).await;
        }
        self.selector.shutdown().await;
    }
}

/// Cancels `turn` when the caller's token fires. Ends with the turn.
fn link_cancellation(caller: CancellationToken, turn: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = caller.cancelled() => turn.cancel(),
            _ = turn.cancelled() => {}
        }
    });
}

/// Relays a turn's segments to the caller and broadcasts them to subscribers.
async fn forward_turn(
    session_id: String,
    mut segments: SegmentStream,
    events: broadcast::Sender<ConversationEvent>,
    tx: mpsc::UnboundedSender<Result<StreamSegment, PipelineError>>,
    turn: CancellationToken,
) {
    let _done = turn.drop_guard();
    let mut delivered = 0usize;
    while let Some(item) = segments.next().await {
        match &item {
            Ok(segment) => {
                delivered += 1;
                let _ = events.send(ConversationEvent::Segment {
                    session_id: session_id.clone(),
                    segment: segment.clone(),
                });
            }
            Err(e) => {
                let _ = events.send(ConversationEvent::TurnFailed {
                    session_id: session_id.clone(),
                    error: e.to_string(),
                });
                let _ = tx.send(item);
                return;
            }
        }
        // The caller may stop listening; subscribers still get the turn.
        let _ = tx.send(item);
    }
    let _ = events.send(ConversationEvent::TurnComplete {
        session_id: session_id.clone(),
        segments: delivered,
    });
    debug!(session_id, segments = delivered, "turn complete");
}
