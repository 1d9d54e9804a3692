#![cfg(unix)]

use facecast_ipc::wire::ProcessSegmentRequest;
use facecast_ipc::{HttpControlClient, HttpTransport, InferenceTransport, IpcError};
use facecast_types::{InferenceJob, SessionBinding};
use facecast_worker::{DeviceConfig, WorkerConfig, WorkerSupervisor};
use std::time::Duration;

const DEVWORKER: &str = env!("CARGO_BIN_EXE_facecast-devworker");

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn http_worker() -> (WorkerSupervisor, String) {
    let port = free_port();
    let mut config = WorkerConfig::new(DEVWORKER, port);
    config.args = vec!["--http".to_string()];
    let supervisor = WorkerSupervisor::new(config);
    supervisor
        .start_worker(port, &DeviceConfig::default())
        .await
        .unwrap();
    (supervisor, format!("http://127.0.0.1:{port}"))
}

#[tokio::test]
async fn control_session_lifecycle() {
    let (supervisor, url) = http_worker().await;
    let dir = tempfile::tempdir().unwrap();
    let audio = dir.path().join("a.wav");
    std::fs::write(&audio, b"RIFF").unwrap();

    let client = HttpControlClient::new(&url, Duration::from_secs(5));
    assert_eq!(client.health().await.unwrap().status, "ok");
    client.initialize().await.unwrap();

    let id = client.start_session("s-1", "anna").await.unwrap();
    assert_eq!(id, "s-1");
    assert_eq!(client.health().await.unwrap().active_sessions, 1);

    let output = dir.path().join("clips/0.mp4");
    let video = client
        .process_segment(&ProcessSegmentRequest {
            session_id: id.clone(),
            audio_path: audio.to_string_lossy().into_owned(),
            segment_index: 0,
            is_final: true,
            output_path: Some(output.to_string_lossy().into_owned()),
        })
        .await
        .unwrap();
    assert_eq!(video, output);
    assert_eq!(std::fs::read(&output).unwrap(), b"RIFF");

    client.end_session(&id).await.unwrap();
    client.end_session(&id).await.unwrap();
    assert_eq!(client.health().await.unwrap().active_sessions, 0);

    let gone = client
        .process_segment(&ProcessSegmentRequest {
            session_id: id,
            audio_path: audio.to_string_lossy().into_owned(),
            segment_index: 1,
            is_final: true,
            output_path: None,
        })
        .await;
    assert!(matches!(gone, Err(IpcError::Worker(_))));

    supervisor.stop_worker().await;
}

#[tokio::test]
async fn transport_renders_bound_jobs() {
    let (supervisor, url) = http_worker().await;
    let dir = tempfile::tempdir().unwrap();
    let audio = dir.path().join("a.wav");
    std::fs::write(&audio, b"RIFF").unwrap();

    let transport = HttpTransport::new(HttpControlClient::new(&url, Duration::from_secs(5)));
    transport.probe().await.unwrap();
    transport.open_session("s-2", "anna").await.unwrap();

    let job = InferenceJob::new("anna", &audio, dir.path().join("seg.mp4")).with_session(SessionBinding {
        session_id: "s-2".to_string(),
        segment_index: 0,
        is_final: true,
    });
    let result = transport.execute(&job).await.unwrap();
    assert!(result.success);
    assert!(dir.path().join("seg.mp4").exists());

    transport.close_session("s-2").await.unwrap();
    transport.close_session("s-2").await.unwrap();

    supervisor.stop_worker().await;
    assert!(transport.probe().await.unwrap_err().is_transport());
}
