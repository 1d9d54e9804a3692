//! Streaming text-to-video pipeline.
//!
//! Reply text arrives token by token from a [`ReplyGenerator`]. The
//! [`StreamingPipeline`] cuts it into sentences, synthesizes speech for each
//! sentence concurrently, and renders video strictly in sentence order so
//! callers receive [`StreamSegment`](facecast_types::StreamSegment)s as soon
//! as each one is ready, never out of order.
//!
//! [`ConversationCoordinator`] layers sessions, realtime audio input and
//! event fan-out on top. The `adapters` module holds concrete collaborators
//! for local speech binaries and OpenAI-compatible chat endpoints.

pub mod adapters;
mod collaborators;
mod config;
pub mod conversation;
mod error;
mod pipeline;
mod segmenter;
mod video;

pub use collaborators::{ReplyGenerator, SpeechRecognizer, SpeechSynthesizer, TextStream, VideoGenerator, VideoRequest};
pub use config::PipelineConfig;
pub use conversation::{AudioFrame, ConversationCoordinator, ConversationEvent};
pub use error::{CollaboratorError, PipelineError};
pub use pipeline::{PipelineRequest, SegmentStream, StreamingPipeline};
pub use segmenter::SentenceSegmenter;
pub use video::SelectorVideoGenerator;
