use crate::collaborators::{ReplyGenerator, TextStream};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use facecast_types::Session;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

/// One decoded server-sent event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseItem {
    Data(String),
    Done,
}

/// Splits a byte stream into `data:` payloads, buffering partial lines
/// across chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseItem> {
        self.buffer.extend_from_slice(chunk);
        let mut items = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                items.push(SseItem::Done);
            } else if !data.is_empty() {
                items.push(SseItem::Data(data.to_string()));
            }
        }
        items
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Streaming client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiReplyGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
    idle_timeout: Duration,
}

impl OpenAiReplyGenerator {
    /// `timeout` bounds connecting and every gap between streamed chunks.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            system_prompt: None,
            idle_timeout: timeout,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiReplyGenerator {
    async fn stream_reply(&self, session: &Session, prompt: &str) -> Result<TextStream, CollaboratorError> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "user": session.session_id,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Failed(format!(
                "chat completion returned {status}: {}",
                text.trim()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut bytes = response.bytes_stream();
        let session_id = session.session_id.clone();
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => return,
                    next = tokio::time::timeout(idle_timeout, bytes.next()) => next,
                };
                let chunk = match next {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(None) => return,
                    Err(_) => {
                        warn!(session_id, ?idle_timeout, "reply stream stalled");
                        let _ = tx.send(Err(CollaboratorError::Timeout(idle_timeout)));
                        return;
                    }
                    Ok(Some(Err(e))) => {
                        warn!(session_id, error = %e, "reply stream interrupted");
                        let _ = tx.send(Err(CollaboratorError::Http(e)));
                        return;
                    }
                };
                for item in decoder.push(&chunk) {
                    let data = match item {
                        SseItem::Done => return,
                        SseItem::Data(data) => data,
                    };
                    match serde_json::from_str::<ChatChunk>(&data) {
                        Ok(parsed) => {
                            let content = parsed.choices.into_iter().filter_map(|c| c.delta.content);
                            for fragment in content.filter(|c| !c.is_empty()) {
                                if tx.send(Ok(fragment)).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => debug!(session_id, error = %e, "skipping unparsable chunk"),
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_buffers_partial_lines() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let items = decoder.push(b":1}\n\ndata: [DONE]\n");
        assert_eq!(items, vec![SseItem::Data("{\"a\":1}".into()), SseItem::Done]);
    }

    #[test]
    fn decoder_ignores_comments_and_crlf() {
        let mut decoder = SseDecoder::new();
        let items = decoder.push(b": keep-alive\r\nevent: x\r\ndata: hi\r\n\r\n");
        assert_eq!(items, vec![SseItem::Data("hi".into())]);
    }

    #[test]
    fn chunk_content_is_extracted() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));
        let role_only: ChatChunk = serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert!(role_only.choices[0].delta.content.is_none());
    }
}
