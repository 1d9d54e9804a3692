use async_trait::async_trait;
use facecast_pipeline::{
    CollaboratorError, PipelineConfig, PipelineError, PipelineRequest, SpeechSynthesizer, StreamingPipeline,
    TextStream, VideoGenerator, VideoRequest,
};
use facecast_types::StreamSegment;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Synthesizer with per-sentence latency and optional failures.
#[derive(Default)]
struct FakeSynth {
    delays: HashMap<String, Duration>,
    failing: Vec<String>,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<PathBuf, CollaboratorError> {
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.iter().any(|f| f == text) {
            return Err(CollaboratorError::Failed(format!("cannot speak {text}")));
        }
        Ok(PathBuf::from(format!("/audio/{text}.wav")))
    }
}

/// Records the order in which audio reaches the video stage.
#[derive(Default)]
struct FakeVideo {
    order: Mutex<Vec<VideoRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    failing_audio: Vec<PathBuf>,
    delay: Duration,
}

#[async_trait]
impl VideoGenerator for FakeVideo {
    async fn generate(&self, request: VideoRequest) -> Result<PathBuf, CollaboratorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.order.lock().unwrap().push(request.clone());
        if self.failing_audio.contains(&request.audio_path) {
            return Err(CollaboratorError::Failed("render failed".into()));
        }
        Ok(request.output_path)
    }
}

fn text_stream(fragments: &[&str]) -> TextStream {
    let items: Vec<Result<String, CollaboratorError>> = fragments.iter().map(|f| Ok(f.to_string())).collect();
    Box::pin(futures_util::stream::iter(items))
}

fn config(dir: &tempfile::TempDir) -> PipelineConfig {
    PipelineConfig {
        max_sentence_chars: 30,
        output_dir: dir.path().to_path_buf(),
        ..PipelineConfig::default()
    }
}

async fn collect(
    pipeline: &StreamingPipeline,
    request: PipelineRequest,
    text: TextStream,
) -> (Vec<StreamSegment>, Option<PipelineError>) {
    let mut stream = pipeline.run(request, text, CancellationToken::new());
    let mut segments = Vec::new();
    let mut error = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(segment) => segments.push(segment),
            Err(e) => {
                assert!(error.is_none(), "more than one terminal error");
                error = Some(e);
            }
        }
    }
    (segments, error)
}

const FIVE: &[&str] = &["One. ", "Two. ", "Three. ", "Four. ", "Five."];

#[tokio::test]
async fn out_of_order_synthesis_renders_in_sentence_order() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynth {
        delays: HashMap::from([
            ("One.".to_string(), Duration::from_millis(150)),
            ("Two.".to_string(), Duration::from_millis(80)),
            ("Three.".to_string(), Duration::from_millis(0)),
        ]),
        ..Default::default()
    };
    let video = Arc::new(FakeVideo::default());
    let pipeline = StreamingPipeline::new(Arc::new(synth), video.clone(), config(&dir));

    let (segments, error) = collect(&pipeline, PipelineRequest::new("anna"), text_stream(FIVE)).await;

    assert!(error.is_none());
    let rendered: Vec<PathBuf> = video.order.lock().unwrap().iter().map(|r| r.audio_path.clone()).collect();
    let expected: Vec<PathBuf> = ["One.", "Two.", "Three.", "Four.", "Five."]
        .iter()
        .map(|t| PathBuf::from(format!("/audio/{t}.wav")))
        .collect();
    assert_eq!(rendered, expected);
    assert_eq!(segments.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    assert_eq!(segments.iter().map(|s| s.sequence).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    assert_eq!(video.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_sentences_leave_dense_indices() {
    let dir = tempfile::tempdir().unwrap();
    let synth = FakeSynth {
        failing: vec!["Two.".to_string()],
        ..Default::default()
    };
    let pipeline = StreamingPipeline::new(Arc::new(synth), Arc::new(FakeVideo::default()), config(&dir));

    let (segments, error) = collect(&pipeline, PipelineRequest::new("anna"), text_stream(FIVE)).await;

    assert!(error.is_none());
    assert_eq!(segments.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert_eq!(segments.iter().map(|s| s.sequence).collect::<Vec<_>>(), vec![0, 2, 3, 4]);
    assert_eq!(segments[1].text, "Three.");
}

#[tokio::test]
async fn video_failure_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let video = Arc::new(FakeVideo {
        failing_audio: vec![PathBuf::from("/audio/Three..wav")],
        ..Default::default()
    });
    let pipeline = StreamingPipeline::new(Arc::new(FakeSynth::default()), video, config(&dir));

    let (segments, error) = collect(&pipeline, PipelineRequest::new("anna"), text_stream(FIVE)).await;

    assert!(error.is_none());
    assert_eq!(segments.len(), 4);
    assert_eq!(segments.iter().map(|s| s.sequence).collect::<Vec<_>>(), vec![0, 1, 3, 4]);
}

#[tokio::test]
async fn upstream_error_follows_the_drained_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let items: Vec<Result<String, CollaboratorError>> = vec![
        Ok("First one. Second one.".to_string()),
        Err(CollaboratorError::Failed("model crashed".into())),
        Ok("Never seen.".to_string()),
    ];
    let text: TextStream = Box::pin(futures_util::stream::iter(items));
    let pipeline = StreamingPipeline::new(Arc::new(FakeSynth::default()), Arc::new(FakeVideo::default()), config(&dir));

    let (segments, error) = collect(&pipeline, PipelineRequest::new("anna"), text).await;

    assert_eq!(
        segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
        vec!["First one.", "Second one."]
    );
    assert!(matches!(error, Some(PipelineError::Upstream(msg)) if msg.contains("model crashed")));
}

#[tokio::test]
async fn cancellation_ends_with_a_single_cancelled_error() {
    let dir = tempfile::tempdir().unwrap();
    let video = Arc::new(FakeVideo {
        delay: Duration::from_millis(100),
        ..Default::default()
    });
    let pipeline = StreamingPipeline::new(Arc::new(FakeSynth::default()), video, config(&dir));

    // Upstream that never finishes after its first sentence.
    let text: TextStream = Box::pin(
        futures_util::stream::iter(vec![Ok::<_, CollaboratorError>("Hello there. ".to_string())])
            .chain(futures_util::stream::pending()),
    );
    let cancel = CancellationToken::new();
    let mut stream = pipeline.run(PipelineRequest::new("anna"), text, cancel.clone());

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.index, 0);
    cancel.cancel();

    let items: Vec<_> = stream.collect().await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(PipelineError::Cancelled)));
}

#[tokio::test]
async fn session_binding_marks_the_last_segment_final() {
    let dir = tempfile::tempdir().unwrap();
    let video = Arc::new(FakeVideo::default());
    let pipeline = StreamingPipeline::new(Arc::new(FakeSynth::default()), video.clone(), config(&dir));

    let request = PipelineRequest::new("anna").with_session("s-1");
    let (segments, _) = collect(&pipeline, request, text_stream(&["One. Two. Three."])).await;
    assert_eq!(segments.len(), 3);

    let requests = video.order.lock().unwrap().clone();
    let bindings: Vec<_> = requests.iter().map(|r| r.session.clone().unwrap()).collect();
    assert!(bindings.iter().all(|b| b.session_id == "s-1"));
    assert_eq!(bindings.iter().map(|b| b.segment_index).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert!(bindings[2].is_final);
}

#[tokio::test]
async fn empty_reply_closes_without_segments() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = StreamingPipeline::new(Arc::new(FakeSynth::default()), Arc::new(FakeVideo::default()), config(&dir));
    let (segments, error) = collect(&pipeline, PipelineRequest::new("anna"), text_stream(&["  ", "\n"])).await;
    assert!(segments.is_empty());
    assert!(error.is_none());
}

/// Counts synthesis calls.
#[derive(Default)]
struct CountingSynth {
    calls: AtomicUsize,
}

#[async_trait]
impl SpeechSynthesizer for CountingSynth {
    async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<PathBuf, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PathBuf::from(format!("/audio/{text}.wav")))
    }
}

#[tokio::test]
async fn dropping_the_stream_stops_upstream_and_synthesis() {
    let dir = tempfile::tempdir().unwrap();
    let synth = Arc::new(CountingSynth::default());
    let pulled = Arc::new(AtomicUsize::new(0));

    let counter = pulled.clone();
    let text: TextStream = Box::pin(futures_util::stream::iter(0..20).then(move |i| {
        let counter = counter.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CollaboratorError>(format!("Sentence {i}. "))
        }
    }));
    let pipeline = StreamingPipeline::new(synth.clone(), Arc::new(FakeVideo::default()), config(&dir));
    let mut stream = pipeline.run(PipelineRequest::new("anna"), text, CancellationToken::new());

    assert_eq!(stream.next().await.unwrap().unwrap().index, 0);
    drop(stream);
    let synthesized_at_drop = synth.calls.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let pulled_after_drop = pulled.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pulled.load(Ordering::SeqCst), pulled_after_drop);
    assert!(pulled_after_drop < 20);
    assert!(synth.calls.load(Ordering::SeqCst) <= synthesized_at_drop + 2);
}

#[tokio::test]
async fn last_segment_is_final_when_the_reply_ends_after_its_last_sentence() {
    let dir = tempfile::tempdir().unwrap();
    let video = Arc::new(FakeVideo::default());
    let pipeline = StreamingPipeline::new(Arc::new(FakeSynth::default()), video.clone(), config(&dir));

    // Both sentences are complete well before the stream reports its end.
    let text: TextStream = Box::pin(
        futures_util::stream::iter(vec![Ok::<_, CollaboratorError>("One. Two. ".to_string())]).chain(
            futures_util::stream::once(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, CollaboratorError>(String::new())
            }),
        ),
    );
    let (segments, error) = collect(&pipeline, PipelineRequest::new("anna").with_session("s-1"), text).await;

    assert!(error.is_none());
    assert_eq!(segments.len(), 2);
    let finals: Vec<bool> = video
        .order
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.session.as_ref().unwrap().is_final)
        .collect();
    assert_eq!(finals, vec![false, true]);
}
