use crate::config::OneShotConfig;
use async_trait::async_trait;
use facecast_ipc::{InferenceTransport, IpcError};
use facecast_types::{InferenceJob, InferenceResult};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// Stderr kept from a failed run, counted from the end.
const MAX_STDERR_BYTES: usize = 4 * 1024;

/// Runs the inference command once per job and waits for it to exit.
///
/// This is the traditional path: no warm state, but nothing to keep alive
/// either, so it works whenever the command itself can run.
#[derive(Debug, Clone)]
pub struct OneShotTransport {
    config: OneShotConfig,
}

impl OneShotTransport {
    pub fn new(config: OneShotConfig) -> Self {
        Self { config }
    }

    fn command(&self, job: &InferenceJob) -> Command {
        let mut command = Command::new(&self.config.executable);
        if let Some(script) = &self.config.script {
            command.arg(script);
        }
        command
            .arg("--template-id")
            .arg(&job.template_id)
            .arg("--audio")
            .arg(&job.audio_path)
            .arg("--output")
            .arg(&job.output_path)
            .arg("--cache-dir")
            .arg(&job.cache_dir)
            .arg("--batch-size")
            .arg(job.batch_size.to_string())
            .arg("--fps")
            .arg(job.fps.to_string());
        if let Some(mode) = &job.parsing_mode {
            command.arg("--parsing-mode").arg(mode);
        }
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl InferenceTransport for OneShotTransport {
    fn name(&self) -> &'static str {
        "oneshot"
    }

    async fn probe(&self) -> Result<(), IpcError> {
        if let Some(script) = &self.config.script {
            if !script.exists() {
                return Err(IpcError::Unavailable(format!("script not found: {}", script.display())));
            }
        }
        Ok(())
    }

    async fn execute(&self, job: &InferenceJob) -> Result<InferenceResult, IpcError> {
        let started = Instant::now();
        let child = self.command(job).spawn().map_err(|e| {
            IpcError::Unavailable(format!(
                "failed to spawn {}: {e}",
                self.config.executable.display()
            ))
        })?;

        let timeout = self.config.timeout();
        // On timeout the child is dropped, and kill_on_drop reaps it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(template_id = %job.template_id, timeout_ms = self.config.timeout_ms, "one-shot job timed out");
                IpcError::Timeout(timeout)
            })?
            .map_err(|e| IpcError::Unavailable(format!("failed to wait for inference process: {e}")))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = tail(&output.stderr, MAX_STDERR_BYTES);
            return Err(IpcError::Worker(format!(
                "inference exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if !job.output_path.exists() {
            return Err(IpcError::Worker(format!(
                "inference produced no output at {}",
                job.output_path.display()
            )));
        }

        debug!(template_id = %job.template_id, elapsed_ms, "one-shot job completed");
        Ok(InferenceResult::succeeded(&job.output_path, elapsed_ms))
    }
}

fn tail(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}
