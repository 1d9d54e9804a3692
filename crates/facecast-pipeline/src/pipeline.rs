use crate::collaborators::{SpeechSynthesizer, TextStream, VideoGenerator, VideoRequest};
use crate::config::PipelineConfig;
use crate::error::{CollaboratorError, PipelineError};
use crate::segmenter::SentenceSegmenter;
use facecast_types::{PipelineTask, SessionBinding, StreamSegment};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ordered output of one run: segments, then at most one terminal error.
pub type SegmentStream = UnboundedReceiverStream<Result<StreamSegment, PipelineError>>;

/// What a single run renders for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub template_id: String,
    /// Worker session the segments are bound to, if any.
    pub session_id: Option<String>,
    /// Overrides the configured voice.
    pub voice: Option<String>,
}

impl PipelineRequest {
    pub fn new(template_id: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            session_id: None,
            voice: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Work handed from the segmenting producer to the ordered drain.
enum Pending {
    Sentence {
        task: PipelineTask,
        synthesis: JoinHandle<Result<PathBuf, CollaboratorError>>,
    },
    Failed(PipelineError),
}

/// Turns streamed reply text into ordered, rendered video segments.
///
/// Speech synthesis runs concurrently for every sentence as soon as it is
/// segmented. Video rendering consumes synthesized audio strictly in
/// sentence order, one job at a time.
pub struct StreamingPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    video: Arc<dyn VideoGenerator>,
    config: PipelineConfig,
}

impl StreamingPipeline {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        video: Arc<dyn VideoGenerator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            synthesizer,
            video,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Starts a run and returns its segment stream immediately.
    pub fn run(&self, request: PipelineRequest, text: TextStream, cancel: CancellationToken) -> SegmentStream {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let run_id = uuid::Uuid::new_v4().to_string();
        let voice = request.voice.clone().or_else(|| self.config.voice.clone());

        tokio::spawn(produce(
            text,
            SentenceSegmenter::new(self.config.max_sentence_chars),
            self.synthesizer.clone(),
            voice,
            pending_tx,
            cancel.clone(),
        ));

        let drain = Drain {
            video: self.video.clone(),
            request,
            output_dir: self.config.output_dir.join(&run_id),
            run_id,
            out: out_tx,
            cancel,
            final_wait: self.config.final_wait(),
        };
        tokio::spawn(drain.run(pending_rx));

        UnboundedReceiverStream::new(out_rx)
    }
}

/// Consumes upstream text, segments it and spawns synthesis per sentence.
///
/// Stops as soon as the drain goes away, so a dropped consumer also stops
/// the upstream reply and any further synthesis.
async fn produce(
    mut text: TextStream,
    mut segmenter: SentenceSegmenter,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    voice: Option<String>,
    pending: UnboundedSender<Pending>,
    cancel: CancellationToken,
) {
    let mut sequence = 0u64;
    let mut enqueue = |sentence: String| -> bool {
        if pending.is_closed() {
            return false;
        }
        let task = PipelineTask::new(sequence, sentence);
        sequence += 1;
        let synthesizer = synthesizer.clone();
        let voice = voice.clone();
        let text = task.text.clone();
        let synthesis = tokio::spawn(async move { synthesizer.synthesize(&text, voice.as_deref()).await });
        debug!(sequence = task.sequence, chars = task.text.chars().count(), "sentence queued for synthesis");
        match pending.send(Pending::Sentence { task, synthesis }) {
            Ok(()) => true,
            Err(rejected) => {
                if let Pending::Sentence { synthesis, .. } = rejected.0 {
                    synthesis.abort();
                }
                false
            }
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = pending.send(Pending::Failed(PipelineError::Cancelled));
                return;
            }
            _ = pending.closed() => {
                debug!("segment consumer gone; abandoning reply stream");
                return;
            }
            next = text.next() => next,
        };

        match next {
            Some(Ok(fragment)) => {
                for sentence in segmenter.push(&fragment) {
                    if !enqueue(sentence) {
                        debug!("segment consumer gone; abandoning reply stream");
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "reply stream failed");
                let _ = pending.send(Pending::Failed(PipelineError::Upstream(e.to_string())));
                return;
            }
            None => {
                if let Some(sentence) = segmenter.finish() {
                    enqueue(sentence);
                }
                return;
            }
        }
    }
}

/// Awaits pending sentences strictly in order and renders each one.
struct Drain {
    video: Arc<dyn VideoGenerator>,
    request: PipelineRequest,
    output_dir: PathBuf,
    run_id: String,
    out: UnboundedSender<Result<StreamSegment, PipelineError>>,
    cancel: CancellationToken,
    final_wait: Duration,
}

impl Drain {
    async fn run(self, mut pending: UnboundedReceiver<Pending>) {
        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            warn!(dir = %self.output_dir.display(), error = %e, "failed to create output directory");
        }
        let mut emitted = 0u64;
        let mut lookahead: Option<Pending> = None;

        loop {
            let item = match lookahead.take() {
                Some(item) => item,
                None => tokio::select! {
                    biased;
                    _ = self.out.closed() => {
                        debug!(run_id = %self.run_id, "segment receiver dropped; stopping");
                        self.abort_remaining(&mut pending);
                        return;
                    }
                    item = pending.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                },
            };

            let (mut task, synthesis) = match item {
                Pending::Sentence { task, synthesis } => (task, synthesis),
                Pending::Failed(e) => {
                    self.abort_remaining(&mut pending);
                    let _ = self.out.send(Err(e));
                    return;
                }
            };

            let abort = synthesis.abort_handle();
            let joined = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    abort.abort();
                    self.abort_remaining(&mut pending);
                    let _ = self.out.send(Err(PipelineError::Cancelled));
                    return;
                }
                _ = self.out.closed() => {
                    abort.abort();
                    debug!(run_id = %self.run_id, "segment receiver dropped; stopping");
                    self.abort_remaining(&mut pending);
                    return;
                }
                joined = synthesis => joined,
            };

            let audio = match joined {
                Ok(Ok(path)) => path,
                Ok(Err(e)) => {
                    task.fail(e.to_string());
                    warn!(sequence = task.sequence, error = %e, "speech synthesis failed; skipping sentence");
                    continue;
                }
                Err(e) => {
                    task.fail(e.to_string());
                    warn!(sequence = task.sequence, error = %e, "synthesis task did not finish; dropping sentence");
                    continue;
                }
            };
            task.synthesized(audio.clone());

            let is_final = self.is_last(&mut pending, &mut lookahead).await;

            let request = VideoRequest {
                template_id: self.request.template_id.clone(),
                audio_path: audio,
                output_path: self.output_dir.join(format!("segment-{:04}.mp4", task.sequence)),
                session: self.request.session_id.as_ref().map(|session_id| SessionBinding {
                    session_id: session_id.clone(),
                    segment_index: task.sequence,
                    is_final,
                }),
            };

            let rendered = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.abort_remaining(&mut pending);
                    if let Some(Pending::Sentence { synthesis, .. }) = lookahead.take() {
                        synthesis.abort();
                    }
                    let _ = self.out.send(Err(PipelineError::Cancelled));
                    return;
                }
                _ = self.out.closed() => {
                    debug!(run_id = %self.run_id, "segment receiver dropped; stopping");
                    self.abort_remaining(&mut pending);
                    if let Some(Pending::Sentence { synthesis, .. }) = lookahead.take() {
                        synthesis.abort();
                    }
                    return;
                }
                rendered = self.video.generate(request) => rendered,
            };

            match rendered {
                Ok(video) => {
                    task.completed(video);
                    let sequence = task.sequence;
                    if let Some(segment) = task.into_segment(emitted) {
                        debug!(run_id = %self.run_id, index = emitted, sequence, "segment ready");
                        emitted += 1;
                        if self.out.send(Ok(segment)).is_err() {
                            debug!(run_id = %self.run_id, "segment receiver dropped; stopping");
                            self.abort_remaining(&mut pending);
                            if let Some(Pending::Sentence { synthesis, .. }) = lookahead.take() {
                                synthesis.abort();
                            }
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(sequence = task.sequence, error = %e, "video generation failed; skipping sentence");
                    task.fail(e.to_string());
                }
            }
        }

        info!(run_id = %self.run_id, segments = emitted, "pipeline run complete");
    }

    /// Whether the sentence about to render is the last of the reply.
    ///
    /// The last sentence is only known once the producer hangs up, so this
    /// waits up to `final_wait` for it to hang up or queue another sentence.
    /// A reply whose stream ends later than that gets no final segment.
    async fn is_last(&self, pending: &mut UnboundedReceiver<Pending>, lookahead: &mut Option<Pending>) -> bool {
        let next = match pending.try_recv() {
            Ok(next) => next,
            Err(TryRecvError::Disconnected) => return true,
            Err(TryRecvError::Empty) => match tokio::time::timeout(self.final_wait, pending.recv()).await {
                Ok(Some(next)) => next,
                Ok(None) => return true,
                Err(_) => return false,
            },
        };
        let failed = matches!(next, Pending::Failed(_));
        *lookahead = Some(next);
        failed
    }

    /// Stops every synthesis still queued; their results are never used.
    fn abort_remaining(&self, pending: &mut UnboundedReceiver<Pending>) {
        pending.close();
        while let Ok(item) = pending.try_recv() {
            if let Pending::Sentence { synthesis, .. } = item {
                synthesis.abort();
            }
        }
    }
}
