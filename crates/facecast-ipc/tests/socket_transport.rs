use facecast_ipc::codec::{read_message, write_frame, write_message, DEFAULT_MAX_FRAME};
use facecast_ipc::{InferenceTransport, IpcError, SocketConfig, SocketTransport, WireRequest, WireResponse};
use facecast_types::InferenceJob;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

/// Serves every request on every accepted connection with `reply`.
async fn spawn_worker<F>(reply: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(WireRequest) -> WireResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let accepted = Arc::new(AtomicUsize::new(0));
    let reply = Arc::new(reply);

    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let reply = reply.clone();
            tokio::spawn(async move {
                while let Ok(request) = read_message::<_, WireRequest>(&mut stream, DEFAULT_MAX_FRAME).await {
                    let response = reply(request);
                    if write_message(&mut stream, &response, DEFAULT_MAX_FRAME).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    (addr, accepted)
}

fn job() -> InferenceJob {
    InferenceJob::new("anna", "/tmp/seg-0.wav", "/tmp/seg-0.mp4")
}

#[tokio::test]
async fn jobs_reuse_one_connection() {
    let (addr, accepted) = spawn_worker(|req| WireResponse::ok(req.output_path)).await;
    let transport = SocketTransport::new(SocketConfig::new(addr));

    for _ in 0..3 {
        let result = transport.execute(&job()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output_path.unwrap().to_str(), Some("/tmp/seg-0.mp4"));
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn worker_rejection_is_a_logical_failure() {
    let (addr, _) = spawn_worker(|_| WireResponse::err("unknown template")).await;
    let transport = SocketTransport::new(SocketConfig::new(addr));

    let err = transport.execute(&job()).await.unwrap_err();
    assert!(!err.is_transport());
    assert!(matches!(err, IpcError::Worker(msg) if msg == "unknown template"));
}

#[tokio::test]
async fn refused_connection_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let transport = SocketTransport::new(SocketConfig::new(addr));
    let err = transport.probe().await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn short_response_with_open_connection_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request: WireRequest = read_message(&mut stream, DEFAULT_MAX_FRAME).await.unwrap();
        // Declares 100 bytes, sends 10, then stalls with the socket open.
        stream.write_all(&100u32.to_le_bytes()).await.unwrap();
        stream.write_all(b"{\"success\"").await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let config = SocketConfig::new(addr).with_request_timeout(Duration::from_millis(300));
    let transport = SocketTransport::new(config);

    let started = Instant::now();
    let err = transport.execute(&job()).await.unwrap_err();
    assert!(matches!(err, IpcError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn short_response_then_close_is_a_framing_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request: WireRequest = read_message(&mut stream, DEFAULT_MAX_FRAME).await.unwrap();
        stream.write_all(&100u32.to_le_bytes()).await.unwrap();
        stream.write_all(b"{\"success\"").await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let transport = SocketTransport::new(SocketConfig::new(addr));
    let err = transport.execute(&job()).await.unwrap_err();
    assert!(matches!(err, IpcError::Framing(_)), "got {err:?}");
    assert!(err.is_transport());
}

#[tokio::test]
async fn connection_is_reestablished_after_a_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        // First connection: answer with garbage and hang up.
        let (mut stream, _) = listener.accept().await.unwrap();
        let _request: WireRequest = read_message(&mut stream, DEFAULT_MAX_FRAME).await.unwrap();
        write_frame(&mut stream, b"garbage", DEFAULT_MAX_FRAME).await.unwrap();
        drop(stream);

        // Second connection: behave.
        let (mut stream, _) = listener.accept().await.unwrap();
        let request: WireRequest = read_message(&mut stream, DEFAULT_MAX_FRAME).await.unwrap();
        write_message(&mut stream, &WireResponse::ok(request.output_path), DEFAULT_MAX_FRAME)
            .await
            .unwrap();
    });

    let transport = SocketTransport::new(SocketConfig::new(addr));
    assert!(transport.execute(&job()).await.unwrap_err().is_transport());
    let result = transport.execute(&job()).await.unwrap();
    assert!(result.success);
}
