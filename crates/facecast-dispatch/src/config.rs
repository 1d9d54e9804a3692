use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Mode selection and traditional-path settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Start the supervised worker when the first probe fails.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,

    /// Probes after an auto-start before giving up on persistent mode.
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default)]
    pub oneshot: OneShotConfig,
}

/// Command run once per job on the traditional path.
#[derive(Debug, Clone, Deserialize)]
pub struct OneShotConfig {
    #[serde(default = "default_oneshot_executable")]
    pub executable: PathBuf,

    #[serde(default)]
    pub script: Option<PathBuf>,

    /// Arguments appended after the job arguments.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_oneshot_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_auto_start() -> bool {
    true
}

fn default_probe_attempts() -> u32 {
    20
}

fn default_probe_interval_ms() -> u64 {
    250
}

fn default_oneshot_executable() -> PathBuf {
    PathBuf::from("python3")
}

fn default_oneshot_timeout_ms() -> u64 {
    300_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            auto_start: default_auto_start(),
            probe_attempts: default_probe_attempts(),
            probe_interval_ms: default_probe_interval_ms(),
            oneshot: OneShotConfig::default(),
        }
    }
}

impl Default for OneShotConfig {
    fn default() -> Self {
        Self {
            executable: default_oneshot_executable(),
            script: None,
            args: Vec::new(),
            env: HashMap::new(),
            timeout_ms: default_oneshot_timeout_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

impl OneShotConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
