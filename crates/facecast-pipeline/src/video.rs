use crate::collaborators::{VideoGenerator, VideoRequest};
use crate::config::PipelineConfig;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use facecast_dispatch::ModeSelector;
use facecast_types::InferenceJob;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// [`VideoGenerator`] backed by the mode selector.
#[derive(Debug, Clone)]
pub struct SelectorVideoGenerator {
    selector: Arc<ModeSelector>,
    cache_dir: PathBuf,
    batch_size: u32,
    fps: u32,
    parsing_mode: Option<String>,
}

impl SelectorVideoGenerator {
    pub fn new(selector: Arc<ModeSelector>, config: &PipelineConfig) -> Self {
        Self {
            selector,
            cache_dir: config.cache_dir.clone(),
            batch_size: config.batch_size,
            fps: config.fps,
            parsing_mode: config.parsing_mode.clone(),
        }
    }

    fn job(&self, request: VideoRequest) -> InferenceJob {
        let job = InferenceJob::new(request.template_id, request.audio_path, request.output_path)
            .with_cache_dir(&self.cache_dir)
            .with_tuning(self.batch_size, self.fps)
            .with_parsing_mode(self.parsing_mode.clone());
        match request.session {
            Some(binding) => job.with_session(binding),
            None => job,
        }
    }
}

#[async_trait]
impl VideoGenerator for SelectorVideoGenerator {
    async fn generate(&self, request: VideoRequest) -> Result<PathBuf, CollaboratorError> {
        let job = self.job(request);
        let dispatched = self.selector.dispatch(&job).await?;
        debug!(
            template_id = %job.template_id,
            mode = %dispatched.mode,
            fell_back = dispatched.fell_back,
            elapsed_ms = dispatched.result.elapsed_ms,
            "video segment rendered"
        );
        dispatched.result.into_output().map_err(CollaboratorError::Failed)
    }
}
