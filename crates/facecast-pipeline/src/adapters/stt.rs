use crate::collaborators::SpeechRecognizer;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Maximum audio input size for one transcription (10 MiB).
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Whisper-style recognizer: reads audio on stdin (`-f -`), prints the
/// transcript on stdout.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    binary: PathBuf,
    args: Vec<String>,
    model_path: Option<PathBuf>,
    timeout: Duration,
}

impl CommandRecognizer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            model_path: None,
            timeout: Duration::from_secs(120),
        }
    }

    /// Arguments placed before the recognizer's own flags.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_model(mut self, model_path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(model_path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SpeechRecognizer for CommandRecognizer {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CollaboratorError> {
        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(CollaboratorError::InvalidInput(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let mut command = Command::new(&self.binary);
        command.args(&self.args);
        if let Some(model) = &self.model_path {
            command.arg("-m").arg(model);
        }
        command
            .arg("-f")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| CollaboratorError::Failed(format!("failed to spawn {}: {e}", self.binary.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CollaboratorError::Failed("failed to open recognizer stdin".to_string()))?;
        let audio_owned = audio.to_vec();
        let write_task = tokio::spawn(async move {
            stdin.write_all(&audio_owned).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CollaboratorError::Timeout(self.timeout))??;

        if let Ok(Err(e)) = write_task.await {
            debug!(error = %e, "recognizer closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::Failed(format!("recognizer failed: {}", stderr.trim())));
        }

        let transcript = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(bytes = audio.len(), chars = transcript.chars().count(), "audio transcribed");
        Ok(transcript)
    }
}
