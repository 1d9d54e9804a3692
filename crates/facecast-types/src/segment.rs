//! Per-sentence pipeline work and the segment delivered to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Progress of one sentence through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for speech synthesis.
    Pending,
    /// Audio is ready; video not yet rendered.
    Synthesized,
    /// Video is rendered.
    Completed,
    /// Synthesis or rendering failed; the sentence is skipped.
    Failed(String),
}

/// One sentence's worth of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTask {
    /// Position of the sentence in the reply.
    pub sequence: u64,
    /// Sentence text.
    pub text: String,
    /// Synthesized speech, once available.
    pub audio_path: Option<PathBuf>,
    /// Rendered video, once available.
    pub video_path: Option<PathBuf>,
    /// Current state.
    pub state: TaskState,
}

impl PipelineTask {
    /// Creates a pending task for a freshly segmented sentence.
    pub fn new(sequence: u64, text: impl Into<String>) -> Self {
        Self {
            sequence,
            text: text.into(),
            audio_path: None,
            video_path: None,
            state: TaskState::Pending,
        }
    }

    /// Records the synthesized audio.
    pub fn synthesized(&mut self, audio_path: PathBuf) {
        self.audio_path = Some(audio_path);
        self.state = TaskState::Synthesized;
    }

    /// Records the rendered video.
    pub fn completed(&mut self, video_path: PathBuf) {
        self.video_path = Some(video_path);
        self.state = TaskState::Completed;
    }

    /// Marks the task failed.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = TaskState::Failed(reason.into());
    }

    /// Converts a completed task into the segment delivered to the caller.
    ///
    /// Returns `None` unless both audio and video are present.
    pub fn into_segment(self, index: u64) -> Option<StreamSegment> {
        if self.state != TaskState::Completed {
            return None;
        }
        Some(StreamSegment {
            index,
            sequence: self.sequence,
            text: self.text,
            audio_path: self.audio_path?,
            video_path: self.video_path?,
            timestamp: Utc::now(),
        })
    }
}

/// The unit of output delivered to the caller, in `index` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSegment {
    /// Dense output position, starting at 0 for every reply.
    pub index: u64,
    /// Sentence number the segment came from. May skip values where a
    /// sentence failed.
    pub sequence: u64,
    /// Sentence text.
    pub text: String,
    /// Rendered clip.
    pub video_path: PathBuf,
    /// Speech track of the clip.
    pub audio_path: PathBuf,
    /// When the segment became available.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_tasks_become_segments() {
        let mut task = PipelineTask::new(3, "Hello.");
        task.synthesized(PathBuf::from("/a.wav"));
        assert!(task.clone().into_segment(0).is_none());

        task.completed(PathBuf::from("/v.mp4"));
        let segment = task.into_segment(1).unwrap();
        assert_eq!(segment.index, 1);
        assert_eq!(segment.sequence, 3);
        assert_eq!(segment.video_path, PathBuf::from("/v.mp4"));
    }

    #[test]
    fn failed_task_keeps_reason() {
        let mut task = PipelineTask::new(0, "x");
        task.fail("tts down");
        assert_eq!(task.state, TaskState::Failed("tts down".to_string()));
    }
}
