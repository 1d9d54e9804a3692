use async_trait::async_trait;
use facecast_dispatch::{DispatchConfig, ModeSelector};
use facecast_ipc::{InferenceTransport, IpcError};
use facecast_pipeline::{
    AudioFrame, CollaboratorError, ConversationCoordinator, ConversationEvent, PipelineConfig, PipelineError,
    ReplyGenerator, SelectorVideoGenerator, SpeechRecognizer, SpeechSynthesizer, StreamingPipeline, TextStream,
};
use facecast_types::{InferenceJob, InferenceResult, Mode, Session};
use std::path::PathBuf;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Worker transport that renders instantly and remembers session traffic.
#[derive(Default)]
struct LoopbackTransport {
    jobs: Mutex<Vec<InferenceJob>>,
    opened: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
}

#[async_trait]
impl InferenceTransport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn probe(&self) -> Result<(), IpcError> {
        Ok(())
    }

    async fn execute(&self, job: &InferenceJob) -> Result<InferenceResult, IpcError> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(InferenceResult::succeeded(&job.output_path, 1))
    }

    async fn open_session(&self, session_id: &str, _template_id: &str) -> Result<(), IpcError> {
        self.opened.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn close_session(&self, session_id: &str) -> Result<(), IpcError> {
        self.closed.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

struct EchoReplies;

#[async_trait]
impl ReplyGenerator for EchoReplies {
    async fn stream_reply(&self, _session: &Session, prompt: &str) -> Result<TextStream, CollaboratorError> {
        let words: Vec<Result<String, CollaboratorError>> =
            prompt.split_inclusive(' ').map(|w| Ok(w.to_string())).collect();
        Ok(Box::pin(futures_util::stream::iter(words)))
    }
}

struct PathSynth;

#[async_trait]
impl SpeechSynthesizer for PathSynth {
    async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<PathBuf, CollaboratorError> {
        Ok(PathBuf::from(format!("/audio/{}.wav", text.len())))
    }
}

struct FixedRecognizer(&'static str);

#[async_trait]
impl SpeechRecognizer for FixedRecognizer {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, CollaboratorError> {
        Ok(self.0.to_string())
    }
}

struct Harness {
    coordinator: ConversationCoordinator,
    persistent: Arc<LoopbackTransport>,
    _dir: tempfile::TempDir,
}

/// Synthesizer whose n-th call takes n × 40 ms.
#[derive(Default)]
struct StaggeredSynth {
    calls: AtomicU64,
}

#[async_trait]
impl SpeechSynthesizer for StaggeredSynth {
    async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<PathBuf, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40 * n)).await;
        Ok(PathBuf::from(format!("/audio/{}.wav", text.len())))
    }
}

async fn harness(transcript: &'static str) -> Harness {
    harness_with(transcript, Arc::new(PathSynth)).await
}

async fn harness_with(transcript: &'static str, synth: Arc<dyn SpeechSynthesizer>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let persistent = Arc::new(LoopbackTransport::default());
    let selector = Arc::new(ModeSelector::new(
        persistent.clone(),
        Arc::new(LoopbackTransport::default()),
        DispatchConfig::default(),
    ));
    assert_eq!(selector.initialize().await, Mode::PersistentActive);

    let config = PipelineConfig {
        output_dir: dir.path().to_path_buf(),
        ..PipelineConfig::default()
    };
    let video = Arc::new(SelectorVideoGenerator::new(selector.clone(), &config));
    let pipeline = Arc::new(StreamingPipeline::new(synth, video, config));
    let coordinator = ConversationCoordinator::new(selector, pipeline, Arc::new(EchoReplies))
        .with_recognizer(Arc::new(FixedRecognizer(transcript)));
    Harness {
        coordinator,
        persistent,
        _dir: dir,
    }
}

#[tokio::test]
async fn say_delivers_segments_and_events() {
    let h = harness("").await;
    let session = h.coordinator.start_session("anna").await.unwrap();
    let mut events = h.coordinator.subscribe(&session.session_id).unwrap();

    let delivered = h
        .coordinator
        .say(&session.session_id, "Hi there. How are you?", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(delivered, 2);

    let mut segment_indices = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            ConversationEvent::Segment { segment, .. } => segment_indices.push(segment.index),
            ConversationEvent::TurnComplete { segments, .. } => {
                assert_eq!(segments, 2);
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(segment_indices, vec![0, 1]);

    let jobs = h.persistent.jobs.lock().unwrap().clone();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.session.as_ref().unwrap().session_id == session.session_id));
    assert_eq!(jobs[0].template_id, "anna");
}

#[tokio::test]
async fn end_session_twice_is_harmless() {
    let h = harness("").await;
    let session = h.coordinator.start_session("anna").await.unwrap();

    assert!(h.coordinator.end_session(&session.session_id).await);
    assert!(!h.coordinator.end_session(&session.session_id).await);
    assert_eq!(*h.persistent.closed.lock().unwrap(), vec![session.session_id.clone()]);
    assert!(matches!(
        h.coordinator.say(&session.session_id, "Hello.", CancellationToken::new()).await,
        Err(PipelineError::UnknownSession(_))
    ));
}

#[tokio::test]
async fn end_session_stops_the_running_turn() {
    let h = harness_with("", Arc::new(StaggeredSynth::default())).await;
    let session = h.coordinator.start_session("anna").await.unwrap();
    let id = session.session_id.as_str();

    let mut stream = h
        .coordinator
        .say_stream(id, "One. Two. Three. Four. Five. Six. Seven. Eight.", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().index, 0);

    assert!(h.coordinator.end_session(id).await);
    let jobs_at_end = h.persistent.jobs.lock().unwrap().len();
    assert_eq!(*h.persistent.closed.lock().unwrap(), vec![session.session_id.clone()]);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.persistent.jobs.lock().unwrap().len(), jobs_at_end);
    assert!(jobs_at_end < 8);

    let rest: Vec<_> = stream.collect().await;
    assert!(matches!(rest.last(), Some(Err(PipelineError::Cancelled))));
    assert_eq!(rest.iter().filter(|item| item.is_err()).count(), 1);
}

#[tokio::test]
async fn caller_cancellation_still_ends_only_that_turn() {
    let h = harness_with("", Arc::new(StaggeredSynth::default())).await;
    let session = h.coordinator.start_session("anna").await.unwrap();
    let id = session.session_id.as_str();

    let cancel = CancellationToken::new();
    let mut stream = h
        .coordinator
        .say_stream(id, "One. Two. Three. Four.", cancel.clone())
        .await
        .unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    cancel.cancel();
    let rest: Vec<_> = stream.collect().await;
    assert!(matches!(rest.last(), Some(Err(PipelineError::Cancelled))));

    // The conversation itself is still usable.
    let delivered = h.coordinator.say(id, "Again.", CancellationToken::new()).await.unwrap();
    assert_eq!(delivered, 1);
}

#[tokio::test]
async fn utterance_is_transcribed_at_end_of_speech() {
    let h = harness("What time is it?").await;
    let session = h.coordinator.start_session("anna").await.unwrap();
    let mut events = h.coordinator.subscribe(&session.session_id).unwrap();
    let id = session.session_id.as_str();

    let partial = AudioFrame {
        data: vec![1, 2, 3],
        end_of_utterance: false,
    };
    assert_eq!(h.coordinator.push_audio(id, partial, CancellationToken::new()).await.unwrap(), None);

    let last = AudioFrame {
        data: vec![4, 5],
        end_of_utterance: true,
    };
    let delivered = h.coordinator.push_audio(id, last, CancellationToken::new()).await.unwrap();
    assert_eq!(delivered, Some(1));

    match events.recv().await.unwrap() {
        ConversationEvent::Transcript { text, .. } => assert_eq!(text, "What time is it?"),
        other => panic!("expected transcript first, got {other:?}"),
    }
}

#[tokio::test]
async fn silence_runs_no_turn() {
    let h = harness("   ").await;
    let session = h.coordinator.start_session("anna").await.unwrap();
    let frame = AudioFrame {
        data: vec![0; 16],
        end_of_utterance: true,
    };
    let outcome = h
        .coordinator
        .push_audio(&session.session_id, frame, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, None);
    assert!(h.persistent.jobs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_releases_every_session() {
    let h = harness("").await;
    let a = h.coordinator.start_session("anna").await.unwrap();
    let b = h.coordinator.start_session("ben").await.unwrap();
    assert_eq!(h.persistent.opened.lock().unwrap().len(), 2);

    h.coordinator.shutdown().await;
    assert_eq!(h.coordinator.session_count(), 0);
    let closed = h.persistent.closed.lock().unwrap().clone();
    assert!(closed.contains(&a.session_id) && closed.contains(&b.session_id));
}
