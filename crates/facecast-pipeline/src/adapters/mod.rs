//! Concrete collaborators: local speech binaries and an OpenAI-compatible
//! chat endpoint.

mod openai;
mod stt;
mod tts;

pub use openai::{OpenAiReplyGenerator, SseDecoder, SseItem};
pub use stt::CommandRecognizer;
pub use tts::CommandSynthesizer;
