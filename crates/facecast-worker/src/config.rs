//! Launch configuration for a supervised worker.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// How to launch and watch one worker process.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Interpreter or binary to execute (e.g. `python3`).
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Script passed as the first argument, if the executable is an interpreter.
    #[serde(default)]
    pub script: Option<PathBuf>,

    /// Host the worker binds to, passed as `--host`.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the worker listens on, passed as `--port`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Extra ports swept for stale processes before each launch.
    #[serde(default)]
    pub reserved_ports: Vec<u16>,

    /// Arguments or file names that identify a worker process. Defaults to the
    /// script file name. Without either, only port holders are swept.
    #[serde(default)]
    pub signatures: Vec<String>,

    /// Arguments appended after `--host`/`--port`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Number of connection attempts while waiting for the port.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Delay between connection attempts, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time a worker gets to exit after a graceful stop, in milliseconds.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Accelerator and library environment.
    #[serde(default)]
    pub device: DeviceConfig,
}

/// Environment that selects the accelerator and library search path.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Value for the device-visibility variable (e.g. `"0"` or `"0,1"`).
    #[serde(default)]
    pub visible_devices: Option<String>,

    /// Name of the device-visibility variable.
    #[serde(default = "default_device_env")]
    pub device_env: String,

    /// Directories prepended to the platform library search path.
    #[serde(default)]
    pub library_paths: Vec<PathBuf>,

    /// Additional environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_executable() -> PathBuf {
    PathBuf::from("python3")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_poll_attempts() -> u32 {
    40
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_stop_grace_ms() -> u64 {
    5_000
}

fn default_device_env() -> String {
    "CUDA_VISIBLE_DEVICES".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            script: None,
            host: default_host(),
            port: default_port(),
            reserved_ports: Vec::new(),
            signatures: Vec::new(),
            args: Vec::new(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            device: DeviceConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            visible_devices: None,
            device_env: default_device_env(),
            library_paths: Vec::new(),
            env: HashMap::new(),
        }
    }
}

impl WorkerConfig {
    /// Creates a config for `executable` listening on `port`.
    pub fn new(executable: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            executable: executable.into(),
            port,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Host used when the supervisor itself connects to the worker.
    ///
    /// A wildcard bind address is not connectable, so loopback is used instead.
    pub fn connect_host(&self) -> &str {
        match self.host.as_str() {
            "0.0.0.0" | "" => "127.0.0.1",
            "::" => "::1",
            other => other,
        }
    }

    /// Ports swept before launching on `port`: the target first, then the
    /// reserved ports, without duplicates.
    pub fn ports_to_sweep(&self, port: u16) -> Vec<u16> {
        let mut ports = vec![port];
        for reserved in &self.reserved_ports {
            if !ports.contains(reserved) {
                ports.push(*reserved);
            }
        }
        ports
    }

    /// Arguments or file names that identify a worker process.
    ///
    /// The executable is never used: it is usually a shared interpreter.
    pub fn effective_signatures(&self) -> Vec<String> {
        let explicit: Vec<String> = self
            .signatures
            .iter()
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect();
        if !explicit.is_empty() {
            return explicit;
        }
        self.script
            .as_ref()
            .and_then(|script| script.file_name())
            .map(|name| vec![name.to_string_lossy().into_owned()])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bound_startup_to_about_two_seconds() {
        let config = WorkerConfig::default();
        let total = config.poll_interval() * config.poll_attempts;
        assert_eq!(total, Duration::from_secs(2));
    }

    #[test]
    fn signature_falls_back_to_script_name() {
        let mut config = WorkerConfig::new("/usr/bin/python3", 8765);
        config.script = Some(PathBuf::from("/opt/avatar/worker_server.py"));
        assert_eq!(config.effective_signatures(), vec!["worker_server.py"]);

        config.signatures = vec!["avatar-worker".to_string()];
        assert_eq!(config.effective_signatures(), vec!["avatar-worker"]);
    }

    #[test]
    fn bare_interpreter_yields_no_signature() {
        assert!(WorkerConfig::default().effective_signatures().is_empty());
        assert!(WorkerConfig::new("/usr/local/bin/facecast-worker", 8765)
            .effective_signatures()
            .is_empty());

        let mut config = WorkerConfig::default();
        config.signatures = vec![" ".to_string()];
        assert!(config.effective_signatures().is_empty());
    }

    #[test]
    fn sweep_lists_target_first_without_duplicates() {
        let mut config = WorkerConfig::default();
        config.reserved_ports = vec![9000, 8765, 9001];
        assert_eq!(config.ports_to_sweep(8765), vec![8765, 9000, 9001]);
    }

    #[test]
    fn wildcard_host_connects_over_loopback() {
        let mut config = WorkerConfig::default();
        config.host = "0.0.0.0".to_string();
        assert_eq!(config.connect_host(), "127.0.0.1");
    }

    #[test]
    fn parses_from_toml_with_defaults() {
        let config: WorkerConfig = toml::from_str(
            r#"
            executable = "python3"
            script = "worker.py"
            port = 9100

            [device]
            visible_devices = "1"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.device.visible_devices.as_deref(), Some("1"));
        assert_eq!(config.device.device_env, "CUDA_VISIBLE_DEVICES");
        assert_eq!(config.poll_attempts, 40);
    }
}
