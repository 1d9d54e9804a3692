//! Facecast server binary.
//!
//! Supervises the inference worker, selects an execution mode, and serves
//! the conversation API with structured logging and graceful shutdown on
//! SIGTERM/SIGINT.

use facecast_dispatch::{ModeSelector, OneShotTransport};
use facecast_ipc::{HttpControlClient, HttpTransport, InferenceTransport, SocketConfig, SocketTransport};
use facecast_pipeline::adapters::{CommandRecognizer, CommandSynthesizer, OpenAiReplyGenerator};
use facecast_pipeline::{ConversationCoordinator, SelectorVideoGenerator, StreamingPipeline};
use facecast_server::config::{self, Config, IpcProtocol};
use facecast_server::{app, background, AppState};
use facecast_worker::WorkerSupervisor;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("FACECAST_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn persistent_transport(config: &Config) -> Arc<dyn InferenceTransport> {
    let address = config.ipc.resolved_address(&config.worker);
    match config.ipc.protocol {
        IpcProtocol::Socket => Arc::new(SocketTransport::new(SocketConfig {
            address,
            request_timeout: config.ipc.request_timeout(),
            connect_timeout: config.ipc.connect_timeout(),
            max_frame: config.ipc.max_frame,
        })),
        IpcProtocol::Http => {
            let client = HttpControlClient::new(address, config.ipc.request_timeout());
            let mut transport = HttpTransport::new(client);
            if let Some(root) = &config.ipc.template_root {
                transport = transport.with_template_root(root);
            }
            Arc::new(transport)
        }
    }
}

fn build_coordinator(config: &Config, selector: Arc<ModeSelector>) -> ConversationCoordinator {
    let tts = &config.collaborators.tts;
    let synthesizer = CommandSynthesizer::new(&tts.binary, &tts.voices_dir, &tts.output_dir)
        .with_args(tts.args.clone())
        .with_default_voice(config.pipeline.voice.clone())
        .with_timeout(tts.timeout());
    let video = SelectorVideoGenerator::new(selector.clone(), &config.pipeline);
    let pipeline = StreamingPipeline::new(Arc::new(synthesizer), Arc::new(video), config.pipeline.clone());

    let llm = &config.collaborators.llm;
    let replies = OpenAiReplyGenerator::new(&llm.base_url, &llm.model, llm.timeout())
        .with_api_key(llm.api_key())
        .with_system_prompt(llm.system_prompt.clone());

    let coordinator = ConversationCoordinator::new(selector, Arc::new(pipeline), Arc::new(replies));
    match &config.collaborators.stt.binary {
        Some(binary) => {
            let stt = &config.collaborators.stt;
            let mut recognizer = CommandRecognizer::new(binary).with_args(stt.args.clone());
            if let Some(model) = &stt.model {
                recognizer = recognizer.with_model(model);
            }
            coordinator.with_recognizer(Arc::new(recognizer))
        }
        None => {
            tracing::info!("no speech recognizer configured; voice input disabled");
            coordinator
        }
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Clear stale workers left behind by a previous run
    let supervisor = Arc::new(WorkerSupervisor::new(config.worker.clone()));
    if !config.worker.reserved_ports.is_empty() {
        let killed = supervisor
            .emergency_cleanup_ports(&config.worker.reserved_ports)
            .await;
        if killed > 0 {
            tracing::warn!(killed, "cleared stale processes from reserved worker ports");
        }
    }

    // Select the execution mode
    let persistent = persistent_transport(&config);
    let traditional = Arc::new(OneShotTransport::new(config.dispatch.oneshot.clone()));
    let selector = Arc::new(
        ModeSelector::new(persistent, traditional, config.dispatch.clone()).with_supervisor(supervisor),
    );
    let mode = selector.initialize().await;
    tracing::info!(%mode, "execution mode selected");

    let coordinator = Arc::new(build_coordinator(&config, selector));
    let state = AppState::new(coordinator.clone());

    tokio::spawn(background::start_session_reaper_task(
        Arc::new(state.clone()),
        config.sessions.idle_timeout_seconds,
    ));

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting facecast server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    coordinator.shutdown().await;
    tracing::info!("facecast server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
