//! Server configuration loading from file and environment variables.

use facecast_dispatch::DispatchConfig;
use facecast_ipc::codec::DEFAULT_MAX_FRAME;
use facecast_pipeline::PipelineConfig;
use facecast_worker::WorkerConfig;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Persistent worker launch settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Transport used to reach the persistent worker.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Mode selection and the one-shot fallback.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Language model, speech synthesis and recognition backends.
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "facecast_worker=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Wire protocol spoken by the persistent worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpcProtocol {
    /// Length-prefixed JSON frames over TCP.
    #[default]
    Socket,
    /// JSON control endpoints over HTTP.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpcConfig {
    #[serde(default)]
    pub protocol: IpcProtocol,

    /// Worker address. Defaults to the supervised worker's host and port.
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Largest accepted frame, in bytes.
    #[serde(default = "default_max_frame")]
    pub max_frame: usize,

    /// Directory of template images, preprocessed when an HTTP session opens.
    #[serde(default)]
    pub template_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Sessions idle for longer than this are ended. Zero disables reaping.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    /// Speech recognition is only wired up when a binary is configured.
    #[serde(default)]
    pub stt: SttConfig,
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

/// Local text-to-speech command.
#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_binary")]
    pub binary: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    /// Directory holding voice models.
    #[serde(default = "default_voices_dir")]
    pub voices_dir: PathBuf,

    /// Where synthesized audio is written.
    #[serde(default = "default_audio_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_tts_timeout_ms")]
    pub timeout_ms: u64,
}

/// Local speech recognition command.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SttConfig {
    #[serde(default)]
    pub binary: Option<PathBuf>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub model: Option<PathBuf>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME
}

fn default_idle_timeout_seconds() -> u64 {
    1_800
}

fn default_llm_base_url() -> String {
    "http://127.0.0.1:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3".to_string()
}

fn default_llm_timeout_ms() -> u64 {
    30_000
}

fn default_tts_binary() -> PathBuf {
    PathBuf::from("piper")
}

fn default_voices_dir() -> PathBuf {
    PathBuf::from("data/voices")
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("data/audio")
}

fn default_tts_timeout_ms() -> u64 {
    60_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            protocol: IpcProtocol::default(),
            address: None,
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_frame: default_max_frame(),
            template_root: None,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout_seconds(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: None,
            system_prompt: None,
            timeout_ms: default_llm_timeout_ms(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            binary: default_tts_binary(),
            args: Vec::new(),
            voices_dir: default_voices_dir(),
            output_dir: default_audio_dir(),
            timeout_ms: default_tts_timeout_ms(),
        }
    }
}

impl IpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Address of the persistent worker in the form the protocol expects:
    /// `host:port` for sockets, a base URL for HTTP.
    pub fn resolved_address(&self, worker: &WorkerConfig) -> String {
        if let Some(address) = &self.address {
            return address.clone();
        }
        let host = worker.connect_host();
        let authority = if host.contains(':') {
            format!("[{host}]:{}", worker.port)
        } else {
            format!("{host}:{}", worker.port)
        };
        match self.protocol {
            IpcProtocol::Socket => authority,
            IpcProtocol::Http => format!("http://{authority}"),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        let name = self.api_key_env.as_deref()?;
        std::env::var(name).ok().filter(|key| !key.trim().is_empty())
    }
}

impl TtsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `FACECAST_HOST` overrides `server.host`
/// - `FACECAST_PORT` overrides `server.port`
/// - `FACECAST_LOG_LEVEL` overrides `logging.level`
/// - `FACECAST_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `FACECAST_WORKER_PORT` overrides `worker.port`
/// - `FACECAST_IPC_PROTOCOL` overrides `ipc.protocol` ("socket" or "http")
/// - `FACECAST_AUTO_START` overrides `dispatch.auto_start`
/// - `FACECAST_OUTPUT_DIR` overrides `pipeline.output_dir`
/// - `FACECAST_LLM_BASE_URL` overrides `collaborators.llm.base_url`
/// - `FACECAST_LLM_MODEL` overrides `collaborators.llm.model`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn parse_flag(value: &str) -> bool {
    value == "true" || value == "1"
}

/// Applies `FACECAST_*` overrides read through `lookup`.
fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("FACECAST_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("FACECAST_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = lookup("FACECAST_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("FACECAST_LOG_JSON") {
        config.logging.json = parse_flag(&json);
    }
    if let Some(port) = lookup("FACECAST_WORKER_PORT") {
        if let Ok(parsed) = port.parse() {
            config.worker.port = parsed;
        }
    }
    if let Some(protocol) = lookup("FACECAST_IPC_PROTOCOL") {
        match protocol.to_ascii_lowercase().as_str() {
            "socket" => config.ipc.protocol = IpcProtocol::Socket,
            "http" => config.ipc.protocol = IpcProtocol::Http,
            other => tracing::warn!(value = other, "ignoring unknown FACECAST_IPC_PROTOCOL"),
        }
    }
    if let Some(auto_start) = lookup("FACECAST_AUTO_START") {
        config.dispatch.auto_start = parse_flag(&auto_start);
    }
    if let Some(dir) = lookup("FACECAST_OUTPUT_DIR") {
        config.pipeline.output_dir = PathBuf::from(dir);
    }
    if let Some(url) = lookup("FACECAST_LLM_BASE_URL") {
        config.collaborators.llm.base_url = url;
    }
    if let Some(model) = lookup("FACECAST_LLM_MODEL") {
        config.collaborators.llm.model = model;
    }
}
