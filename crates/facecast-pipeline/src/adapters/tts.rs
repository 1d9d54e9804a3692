use crate::collaborators::SpeechSynthesizer;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Maximum text input size for one synthesis (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Piper-style synthesizer: reads text on stdin, writes a WAV file named by
/// `--output_file`.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    binary: PathBuf,
    args: Vec<String>,
    voices_dir: PathBuf,
    default_voice: Option<String>,
    output_dir: PathBuf,
    timeout: Duration,
}

impl CommandSynthesizer {
    pub fn new(binary: impl Into<PathBuf>, voices_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            voices_dir: voices_dir.into(),
            default_voice: None,
            output_dir: output_dir.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Arguments placed before the synthesizer's own flags.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_default_voice(mut self, voice: Option<String>) -> Self {
        self.default_voice = voice;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn model_path(&self, voice: &str) -> PathBuf {
        if Path::new(voice).is_absolute() {
            PathBuf::from(voice)
        } else {
            self.voices_dir.join(voice)
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<PathBuf, CollaboratorError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(CollaboratorError::InvalidInput(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output = self.output_dir.join(format!("{}.wav", uuid::Uuid::new_v4()));

        let mut command = Command::new(&self.binary);
        command.args(&self.args);
        if let Some(voice) = voice.or(self.default_voice.as_deref()) {
            command.arg("--model").arg(self.model_path(voice));
        }
        command
            .arg("--output_file")
            .arg(&output)
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
            .ok_or_else(|| CollaboratorError::Failed("failed to open synthesizer stdin".to_string()))?;
        let text_owned = text.to_string();
        // Written from a task so a full stdout pipe cannot deadlock the write.
        let write_task = tokio::spawn(async move {
            stdin.write_all(text_owned.as_bytes()).await?;
            stdin.shutdown().await
        });

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CollaboratorError::Timeout(self.timeout))??;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CollaboratorError::Failed(format!("failed to write synthesizer stdin: {e}"))),
            Err(e) => return Err(CollaboratorError::Failed(format!("stdin task failed: {e}"))),
        }

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(CollaboratorError::Failed(format!("synthesizer failed: {}", stderr.trim())));
        }
        if !output.exists() {
            return Err(CollaboratorError::Failed(format!(
                "synthesizer wrote no audio to {}",
                output.display()
            )));
        }
        debug!(chars = text.chars().count(), path = %output.display(), "speech synthesized");
        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn synthesizer(dir: &Path, body: &str) -> CommandSynthesizer {
        let script = dir.join("tts.sh");
        std::fs::write(&script, format!("{body}\n")).unwrap();
        CommandSynthesizer::new("sh", dir, dir.join("audio")).with_args(vec![script.to_string_lossy().into_owned()])
    }

    #[tokio::test]
    async fn writes_stdin_text_to_the_output_file() {
        let dir = tempfile::tempdir().unwrap();
        // Arguments: --output_file <path>
        let synthesizer = synthesizer(dir.path(), r#"cat > "$2""#);

        let path = synthesizer.synthesize("Hello there.", None).await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Hello there.");
    }

    #[tokio::test]
    async fn oversized_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let synthesizer = CommandSynthesizer::new("/bin/true", dir.path(), dir.path());
        let text = "a".repeat(MAX_TTS_INPUT_BYTES + 1);
        assert!(matches!(
            synthesizer.synthesize(&text, None).await,
            Err(CollaboratorError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn failing_binary_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let synthesizer = synthesizer(dir.path(), "cat > /dev/null; echo 'voice missing' >&2; exit 1");
        let err = synthesizer.synthesize("Hi.", None).await.unwrap_err();
        assert!(err.to_string().contains("voice missing"));
    }
}
