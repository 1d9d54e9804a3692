//! Inference job and result values exchanged with video workers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default frames-per-second for rendered segments.
pub const DEFAULT_FPS: u32 = 25;

/// Default inference batch size.
pub const DEFAULT_BATCH_SIZE: u32 = 4;

/// Binds a job to a worker-side session so the worker can reuse per-session
/// state (preprocessed template, warm caches) across segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBinding {
    /// Opaque session id returned by the worker on session start.
    pub session_id: String,
    /// Position of this segment within the session's reply.
    pub segment_index: u64,
    /// Whether this is the last segment of the reply.
    pub is_final: bool,
}

/// A single audio-driven video synthesis request.
///
/// Built once, then shared by reference. Nothing mutates a job after it has
/// been handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceJob {
    /// Template (avatar) the video is rendered from.
    pub template_id: String,
    /// Audio clip that drives the lip motion.
    pub audio_path: PathBuf,
    /// Where the worker writes the rendered clip.
    pub output_path: PathBuf,
    /// Worker-side cache directory for template preprocessing.
    pub cache_dir: PathBuf,
    /// Inference batch size.
    pub batch_size: u32,
    /// Output frame rate.
    pub fps: u32,
    /// Face parsing mode understood by the worker (for example `"jaw"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsing_mode: Option<String>,
    /// Session binding, present when the job belongs to a persistent session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionBinding>,
}

impl InferenceJob {
    /// Creates a job with default tuning parameters and no session binding.
    pub fn new(
        template_id: impl Into<String>,
        audio_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            audio_path: audio_path.into(),
            output_path: output_path.into(),
            cache_dir: PathBuf::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            fps: DEFAULT_FPS,
            parsing_mode: None,
            session: None,
        }
    }

    /// Sets the worker-side cache directory.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Sets batch size and frame rate.
    pub fn with_tuning(mut self, batch_size: u32, fps: u32) -> Self {
        self.batch_size = batch_size;
        self.fps = fps;
        self
    }

    /// Sets the face parsing mode.
    pub fn with_parsing_mode(mut self, mode: Option<String>) -> Self {
        self.parsing_mode = mode;
        self
    }

    /// Binds the job to a worker session.
    pub fn with_session(mut self, binding: SessionBinding) -> Self {
        self.session = Some(binding);
        self
    }
}

/// Outcome of one inference job.
///
/// Produced exactly once per job by the transport that executed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Whether the worker reported success.
    pub success: bool,
    /// Rendered clip location on success.
    pub output_path: Option<PathBuf>,
    /// Worker-reported error on failure.
    pub error: Option<String>,
    /// Wall-clock time spent on the job, in milliseconds.
    pub elapsed_ms: u64,
}

impl InferenceResult {
    /// A successful result pointing at the rendered clip.
    pub fn succeeded(output_path: impl AsRef<Path>, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            output_path: Some(output_path.as_ref().to_path_buf()),
            error: None,
            elapsed_ms,
        }
    }

    /// A failed result carrying the worker's message.
    pub fn failed(error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            output_path: None,
            error: Some(error.into()),
            elapsed_ms,
        }
    }

    /// Converts the result into the rendered path or the worker's message.
    ///
    /// A success without an output path is treated as a failure.
    pub fn into_output(self) -> Result<PathBuf, String> {
        match (self.success, self.output_path) {
            (true, Some(path)) => Ok(path),
            (true, None) => Err("worker reported success without an output path".to_string()),
            (false, _) => Err(self
                .error
                .unwrap_or_else(|| "worker reported failure without a message".to_string())),
        }
    }
}
