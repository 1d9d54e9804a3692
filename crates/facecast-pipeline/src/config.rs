use facecast_types::{DEFAULT_BATCH_SIZE, DEFAULT_FPS};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by every pipeline run.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Buffer length at which a sentence is cut without punctuation.
    #[serde(default = "default_max_sentence_chars")]
    pub max_sentence_chars: usize,

    /// Directory receiving rendered clips.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Worker-side template cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default)]
    pub parsing_mode: Option<String>,

    /// Voice passed to the synthesizer when a turn does not name one.
    #[serde(default)]
    pub voice: Option<String>,

    /// How long a rendered sentence waits for the reply to end before it is
    /// sent to the worker as not final, in milliseconds.
    #[serde(default = "default_final_wait_ms")]
    pub final_wait_ms: u64,
}

fn default_max_sentence_chars() -> usize {
    120
}

fn default_final_wait_ms() -> u64 {
    250
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_sentence_chars: default_max_sentence_chars(),
            output_dir: default_output_dir(),
            cache_dir: default_cache_dir(),
            batch_size: default_batch_size(),
            fps: default_fps(),
            parsing_mode: None,
            voice: None,
            final_wait_ms: default_final_wait_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn final_wait(&self) -> Duration {
        Duration::from_millis(self.final_wait_ms)
    }
}
