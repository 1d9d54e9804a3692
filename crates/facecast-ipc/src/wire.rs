//! Message bodies for both worker protocols.

use facecast_types::InferenceJob;
use serde::{Deserialize, Serialize};

/// Framed socket request: the job's fields with the session binding flattened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    pub template_id: String,
    pub audio_path: String,
    pub output_path: String,
    pub cache_dir: String,
    pub batch_size: u32,
    pub fps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsing_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub segment_index: u64,
    #[serde(default)]
    pub is_final: bool,
}

impl From<&InferenceJob> for WireRequest {
    fn from(job: &InferenceJob) -> Self {
        let session = job.session.as_ref();
        Self {
            template_id: job.template_id.clone(),
            audio_path: job.audio_path.to_string_lossy().into_owned(),
            output_path: job.output_path.to_string_lossy().into_owned(),
            cache_dir: job.cache_dir.to_string_lossy().into_owned(),
            batch_size: job.batch_size,
            fps: job.fps,
            parsing_mode: job.parsing_mode.clone(),
            session_id: session.map(|s| s.session_id.clone()),
            segment_index: session.map(|s| s.segment_index).unwrap_or_default(),
            is_final: session.map(|s| s.is_final).unwrap_or(true),
        }
    }
}

/// Framed socket response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    pub success: bool,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl WireResponse {
    pub fn ok(output_path: impl Into<String>) -> Self {
        Self {
            success: true,
            output_path: Some(output_path.into()),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output_path: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessRequest {
    pub template_id: String,
    pub image_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub session_id: String,
    pub template_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSegmentRequest {
    pub session_id: String,
    pub audio_path: String,
    pub segment_index: u64,
    pub is_final: bool,
    /// Where to write the clip; the worker picks a path when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSegmentResponse {
    pub video_path: String,
}

/// `GET /health` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub active_sessions: usize,
}

/// Error body returned by the HTTP control protocol on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
