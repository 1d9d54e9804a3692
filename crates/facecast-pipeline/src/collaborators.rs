//! Contracts for the external engines the pipeline drives.

use crate::error::CollaboratorError;
use async_trait::async_trait;
use facecast_types::{Session, SessionBinding};
use futures_util::Stream;
use std::path::PathBuf;
use std::pin::Pin;

/// Incremental reply text. The end of the stream is the end of the reply.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, CollaboratorError>> + Send>>;

/// Language model producing a streamed reply.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn stream_reply(&self, session: &Session, prompt: &str) -> Result<TextStream, CollaboratorError>;
}

/// Text-to-speech engine. Returns the path of the synthesized audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<PathBuf, CollaboratorError>;
}

/// Speech-to-text engine.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CollaboratorError>;
}

/// One audio-driven video render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRequest {
    pub template_id: String,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    pub session: Option<SessionBinding>,
}

/// Audio-driven video synthesis. Returns the path of the rendered clip.
#[async_trait]
pub trait VideoGenerator: Send + Sync {
    async fn generate(&self, request: VideoRequest) -> Result<PathBuf, CollaboratorError>;
}
