use crate::claims::PortClaims;
use crate::config::{DeviceConfig, WorkerConfig};
use crate::error::SupervisorError;
use crate::inspect::{find_conflicts, os_force_kill, ProcessInspector, SystemInspector};
use facecast_types::{WorkerState, WorkerStatus};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Grace period used by conflict sweeps between SIGTERM and SIGKILL.
const SWEEP_GRACE: Duration = Duration::from_millis(1_500);

/// Interval at which a sweep re-checks whether a victim has gone.
const SWEEP_POLL: Duration = Duration::from_millis(50);

/// The one worker process a supervisor owns.
#[derive(Debug)]
struct WorkerProcess {
    child: Child,
    pid: u32,
    port: u16,
    state: WorkerState,
}

/// Owns at most one worker process and serializes every lifecycle operation
/// on a single mutex, so concurrent starts never produce two live workers.
#[derive(Debug)]
pub struct WorkerSupervisor {
    config: WorkerConfig,
    inspector: Arc<dyn ProcessInspector>,
    claims: PortClaims,
    worker: Mutex<Option<WorkerProcess>>,
    launches: AtomicU32,
}

impl WorkerSupervisor {
    /// Creates a supervisor using the platform inspector and private port claims.
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_inspector(config, Arc::new(SystemInspector::new()), PortClaims::new())
    }

    /// Creates a supervisor with an explicit inspector and a shared claim set.
    pub fn with_inspector(
        config: WorkerConfig,
        inspector: Arc<dyn ProcessInspector>,
        claims: PortClaims,
    ) -> Self {
        Self {
            config,
            inspector,
            claims,
            worker: Mutex::new(None),
            launches: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Ensures a single healthy worker listens on `port`.
    ///
    /// Returns immediately if this supervisor already owns a live worker on
    /// that port. Otherwise sweeps stale processes, launches the worker and
    /// polls the port until it accepts a connection.
    pub async fn start_worker(
        &self,
        port: u16,
        device: &DeviceConfig,
    ) -> Result<WorkerStatus, SupervisorError> {
        let mut guard = self.worker.lock().await;

        if let Some(mut current) = guard.take() {
            if current.port == port && refresh_state(&mut current) {
                let status = self.status_of(&current);
                *guard = Some(current);
                return Ok(status);
            }
            info!(pid = current.pid, port = current.port, "replacing previous worker");
            self.shutdown_process(&mut current).await;
            self.claims.release(current.port);
        }

        if !self.claims.claim(port) {
            return Err(SupervisorError::PortClaimed(port));
        }

        match self.launch(port, device).await {
            Ok(process) => {
                let status = self.status_of(&process);
                info!(pid = status.pid, port, launches = status.launches, "worker listening");
                *guard = Some(process);
                Ok(status)
            }
            Err(e) => {
                self.claims.release(port);
                warn!(port, error = %e, "worker failed to start");
                Err(e)
            }
        }
    }

    /// Stops the worker: SIGTERM, a bounded wait, then a tree kill.
    ///
    /// Always releases the handle. Calling it without a worker is a no-op.
    pub async fn stop_worker(&self) {
        let mut guard = self.worker.lock().await;
        let Some(mut process) = guard.take() else {
            return;
        };
        self.shutdown_process(&mut process).await;
        self.claims.release(process.port);
        info!(pid = process.pid, port = process.port, state = %process.state, "worker stopped");
    }

    /// True iff a handle exists, the process has not exited, and the port was
    /// last confirmed listening.
    ///
    /// Observing an exit drops the handle and releases the port.
    pub async fn is_running(&self) -> bool {
        let mut guard = self.worker.lock().await;
        let Some(process) = guard.as_mut() else {
            return false;
        };
        if refresh_state(process) {
            return true;
        }
        if process.state == WorkerState::Exited {
            self.claims.release(process.port);
            *guard = None;
        }
        false
    }

    /// Promotes a listening worker to `Running` once it answered a
    /// protocol-level health probe.
    pub async fn mark_running(&self) {
        let mut guard = self.worker.lock().await;
        if let Some(process) = guard.as_mut() {
            if refresh_state(process) {
                process.state = WorkerState::Running;
            }
        }
    }

    /// Snapshot of the owned worker, if any.
    pub async fn status(&self) -> Option<WorkerStatus> {
        let mut guard = self.worker.lock().await;
        let process = guard.as_mut()?;
        refresh_state(process);
        Some(self.status_of(process))
    }

    /// Kills every process bound to `ports`, whatever started it.
    pub async fn emergency_cleanup_ports(&self, ports: &[u16]) -> usize {
        emergency_cleanup_ports(self.inspector.clone(), ports).await
    }

    fn status_of(&self, process: &WorkerProcess) -> WorkerStatus {
        WorkerStatus {
            pid: process.pid,
            port: process.port,
            state: process.state,
            launches: self.launches.load(Ordering::Relaxed),
        }
    }

    async fn launch(&self, port: u16, device: &DeviceConfig) -> Result<WorkerProcess, SupervisorError> {
        let ports = self.config.ports_to_sweep(port);
        let swept = self.clear_conflicts(&ports).await?;
        if swept > 0 {
            info!(count = swept, ?ports, "removed conflicting processes before launch");
        }

        let mut child = self.command(port, device).spawn().map_err(|source| {
            SupervisorError::Spawn {
                executable: self.config.executable.display().to_string(),
                source,
            }
        })?;
        let pid = child.id().unwrap_or_default();
        self.launches.fetch_add(1, Ordering::Relaxed);
        capture_output(pid, &mut child);

        let mut process = WorkerProcess {
            child,
            pid,
            port,
            state: WorkerState::Starting,
        };

        if let Err(e) = self.wait_until_listening(&mut process).await {
            // A half-started worker must not outlive the failed start.
            self.shutdown_process(&mut process).await;
            return Err(e);
        }
        process.state = WorkerState::Listening;
        Ok(process)
    }

    fn command(&self, port: u16, device: &DeviceConfig) -> Command {
        let mut command = Command::new(&self.config.executable);
        if let Some(script) = &self.config.script {
            command.arg(script);
        }
        command
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(port.to_string())
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(devices) = &device.visible_devices {
            command.env(&device.device_env, devices);
        }
        if !device.library_paths.is_empty() {
            let var = library_path_var();
            let mut paths = device.library_paths.clone();
            if let Some(existing) = std::env::var_os(var) {
                paths.extend(std::env::split_paths(&existing));
            }
            match std::env::join_paths(paths) {
                Ok(joined) => {
                    command.env(var, joined);
                }
                Err(e) => warn!(error = %e, "ignoring unusable library path"),
            }
        }
        for (key, value) in &device.env {
            command.env(key, value);
        }
        command
    }

    async fn wait_until_listening(&self, process: &mut WorkerProcess) -> Result<(), SupervisorError> {
        let host = self.config.connect_host().to_string();
        let interval = self.config.poll_interval();
        let attempts = self.config.poll_attempts.max(1);

        for attempt in 0..attempts {
            if let Some(status) = process.child.try_wait()? {
                process.state = WorkerState::Exited;
                return Err(SupervisorError::ExitedEarly {
                    port: process.port,
                    status: status.to_string(),
                });
            }

            let connect = TcpStream::connect((host.as_str(), process.port));
            if let Ok(Ok(_stream)) = tokio::time::timeout(interval, connect).await {
                // The port may belong to something we failed to sweep; only a
                // still-running child counts as ready.
                if process.child.try_wait()?.is_none() {
                    debug!(pid = process.pid, attempt, "worker port accepted a connection");
                    return Ok(());
                }
                continue;
            }
            tokio::time::sleep(interval).await;
        }

        Err(SupervisorError::PortNeverOpened {
            port: process.port,
            waited_ms: interval.as_millis() as u64 * u64::from(attempts),
        })
    }

    async fn clear_conflicts(&self, ports: &[u16]) -> Result<usize, SupervisorError> {
        let inspector = self.inspector.clone();
        let signatures = self.config.effective_signatures();
        let ports_owned = ports.to_vec();
        let exclude = vec![std::process::id()];

        let conflicts = tokio::task::spawn_blocking(move || {
            find_conflicts(inspector.as_ref(), &signatures, &ports_owned, &exclude)
        })
        .await
        .map_err(|e| SupervisorError::Inspect(e.to_string()))?;

        if conflicts.is_empty() {
            return Ok(0);
        }
        for conflict in &conflicts {
            warn!(pid = conflict.pid, reason = ?conflict.reason, "terminating conflicting process");
        }
        let pids = conflicts.iter().map(|c| c.pid).collect();
        Ok(terminate_all(self.inspector.clone(), pids, SWEEP_GRACE).await)
    }

    async fn shutdown_process(&self, process: &mut WorkerProcess) {
        if let Ok(Some(status)) = process.child.try_wait() {
            debug!(pid = process.pid, %status, "worker already exited");
            process.state = WorkerState::Exited;
            return;
        }

        let inspector = self.inspector.clone();
        let pid = process.pid;
        let _ = tokio::task::spawn_blocking(move || inspector.terminate(pid)).await;

        match tokio::time::timeout(self.config.stop_grace(), process.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid, %status, "worker exited after terminate");
            }
            _ => {
                warn!(pid, grace_ms = self.config.stop_grace_ms, "worker ignored terminate; killing process tree");
                let inspector = self.inspector.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    for child in inspector.descendants(pid) {
                        inspector.force_kill(child);
                    }
                })
                .await;
                if let Err(e) = process.child.kill().await {
                    warn!(pid, error = %e, "failed to kill worker");
                }
            }
        }
        process.state = WorkerState::Killed;
    }
}

/// Checks the child for an exit and reports whether it is still live.
fn refresh_state(process: &mut WorkerProcess) -> bool {
    match process.child.try_wait() {
        Ok(None) => process.state.is_live(),
        Ok(Some(status)) => {
            if process.state != WorkerState::Exited && process.state != WorkerState::Killed {
                warn!(pid = process.pid, port = process.port, %status, "worker exited");
                process.state = WorkerState::Exited;
            }
            false
        }
        Err(e) => {
            warn!(pid = process.pid, error = %e, "failed to poll worker status");
            false
        }
    }
}

fn capture_output(pid: u32, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(pid, "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(pid, "stderr", stderr));
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(pid: u32, stream: &'static str, reader: R) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(pid, stream, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(pid, stream, error = %e, "worker output closed");
                break;
            }
        }
    }
}

fn library_path_var() -> &'static str {
    if cfg!(windows) {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

/// Terminates `pids`, escalating to a kill for anything still alive after
/// `grace`, and to the OS kill command after that. Returns how many are gone.
async fn terminate_all(inspector: Arc<dyn ProcessInspector>, pids: Vec<u32>, grace: Duration) -> usize {
    let task = tokio::task::spawn_blocking(move || {
        for &pid in &pids {
            inspector.terminate(pid);
        }
        wait_for_exit(inspector.as_ref(), &pids, grace);

        for &pid in &pids {
            if inspector.is_alive(pid) {
                warn!(pid, "process survived terminate; forcing kill");
                inspector.force_kill(pid);
            }
        }
        wait_for_exit(inspector.as_ref(), &pids, grace);

        for &pid in &pids {
            if inspector.is_alive(pid) {
                warn!(pid, "process survived kill; using OS kill");
                if !os_force_kill(pid) {
                    warn!(pid, "OS kill failed");
                }
            }
        }
        wait_for_exit(inspector.as_ref(), &pids, grace);

        pids.iter().filter(|&&pid| !inspector.is_alive(pid)).count()
    });
    task.await.unwrap_or_else(|e| {
        warn!(error = %e, "termination task failed");
        0
    })
}

fn wait_for_exit(inspector: &dyn ProcessInspector, pids: &[u32], grace: Duration) {
    let deadline = std::time::Instant::now() + grace;
    while std::time::Instant::now() < deadline {
        if pids.iter().all(|&pid| !inspector.is_alive(pid)) {
            return;
        }
        std::thread::sleep(SWEEP_POLL);
    }
}

/// Last-resort sweep: kills every process bound to `ports` regardless of
/// origin, except the current process. Returns how many were removed.
pub async fn emergency_cleanup_ports(inspector: Arc<dyn ProcessInspector>, ports: &[u16]) -> usize {
    let own = std::process::id();
    let ports_owned = ports.to_vec();
    let lookup = inspector.clone();
    let pids = tokio::task::spawn_blocking(move || {
        let mut pids: Vec<u32> = Vec::new();
        for port in ports_owned {
            for pid in lookup.listeners_on(port) {
                if pid != own && !pids.contains(&pid) {
                    pids.push(pid);
                }
            }
        }
        pids
    })
    .await
    .unwrap_or_default();

    if pids.is_empty() {
        debug!(?ports, "emergency cleanup found nothing to remove");
        return 0;
    }

    warn!(?ports, ?pids, "emergency cleanup terminating port holders");
    let removed = terminate_all(inspector, pids, SWEEP_GRACE).await;
    info!(removed, "emergency cleanup finished");
    removed
}
