//! Loopback inference worker for local development and tests.
//!
//! Speaks both worker protocols and "renders" by copying the audio file to
//! the requested output path:
//!
//! ```text
//! facecast-devworker --host 127.0.0.1 --port 8765            # framed socket
//! facecast-devworker --host 127.0.0.1 --port 8765 --http     # HTTP control
//! facecast-devworker --audio a.wav --output a.mp4            # one-shot
//! ```

mod args;
mod http;
mod render;
mod socket;

use args::Command;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = match args::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::from(2);
        }
    };

    match options.command {
        Command::Render(render_args) => {
            match render::render(&render_args.audio, &render_args.output, options.delay).await {
                Ok(_) => {
                    tracing::info!(
                        template_id = %render_args.template_id,
                        output = %render_args.output.display(),
                        "rendered"
                    );
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    tracing::error!(audio = %render_args.audio.display(), error = %e, "render failed");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Socket { host, port } => {
            let listener = match bind(host, port).await {
                Some(listener) => listener,
                None => return ExitCode::FAILURE,
            };
            tracing::info!(%host, port, "serving framed socket protocol");
            match socket::serve(listener, options.delay).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "accept loop failed");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Http { host, port } => {
            let listener = match bind(host, port).await {
                Some(listener) => listener,
                None => return ExitCode::FAILURE,
            };
            let scratch = std::env::temp_dir().join("facecast-devworker");
            let state = Arc::new(http::ControlState::new(scratch, options.delay));
            tracing::info!(%host, port, "serving HTTP control protocol");
            match axum::serve(listener, http::router(state)).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "server error");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn bind(host: std::net::IpAddr, port: u16) -> Option<TcpListener> {
    let addr = SocketAddr::new(host, port);
    match TcpListener::bind(addr).await {
        Ok(listener) => Some(listener),
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            None
        }
    }
}
