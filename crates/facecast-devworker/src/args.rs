//! Command-line parsing.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },

    #[error("--audio and --output must be given together")]
    IncompleteRender,
}

/// A single render, as the one-shot path invokes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderArgs {
    pub template_id: String,
    pub audio: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve length-prefixed frames on `host:port`.
    Socket { host: IpAddr, port: u16 },
    /// Serve the HTTP control endpoints on `host:port`.
    Http { host: IpAddr, port: u16 },
    /// Render once and exit.
    Render(RenderArgs),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub command: Command,
    /// Simulated render latency.
    pub delay: Duration,
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, ArgsError> {
    let value = value.ok_or_else(|| ArgsError::MissingValue(flag.to_string()))?;
    value.parse().map_err(|_| ArgsError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

/// Parses everything after the program name. Flags the worker does not use
/// (`--cache-dir`, `--fps` and the like) are accepted and ignored.
pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Options, ArgsError> {
    let mut host: IpAddr = IpAddr::from([127, 0, 0, 1]);
    let mut port: u16 = 8765;
    let mut http = false;
    let mut template_id = String::from("default");
    let mut audio = None;
    let mut output = None;
    let mut delay_ms = 0u64;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg, None),
        };
        let mut value = || inline.clone().or_else(|| args.next());
        match flag.as_str() {
            "--host" => host = parse_value(&flag, value())?,
            "--port" => port = parse_value(&flag, value())?,
            "--http" => http = true,
            "--template-id" => template_id = parse_value(&flag, value())?,
            "--audio" => audio = Some(parse_value::<PathBuf>(&flag, value())?),
            "--output" => output = Some(parse_value::<PathBuf>(&flag, value())?),
            "--delay-ms" => delay_ms = parse_value(&flag, value())?,
            "--cache-dir" | "--batch-size" | "--fps" | "--parsing-mode" => {
                let _ = value();
            }
            other => tracing::debug!(arg = other, "ignoring argument"),
        }
    }

    let command = match (audio, output) {
        (Some(audio), Some(output)) => Command::Render(RenderArgs {
            template_id,
            audio,
            output,
        }),
        (None, None) if http => Command::Http { host, port },
        (None, None) => Command::Socket { host, port },
        _ => return Err(ArgsError::IncompleteRender),
    };
    Ok(Options {
        command,
        delay: Duration::from_millis(delay_ms),
    })
}
