use crate::config::DispatchConfig;
use crate::error::DispatchError;
use facecast_ipc::{InferenceTransport, IpcError};
use facecast_types::{InferenceJob, InferenceResult, Mode, Session};
use facecast_worker::WorkerSupervisor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of a dispatched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub result: InferenceResult,
    /// Mode of the transport that produced `result`.
    pub mode: Mode,
    /// Whether the persistent attempt failed and the job was retried.
    pub fell_back: bool,
}

#[derive(Debug)]
struct SessionEntry {
    session: Session,
    /// Serializes video jobs of this session.
    lock: Arc<Mutex<()>>,
    /// Whether worker-side state was opened on the persistent transport.
    remote: bool,
}

/// Counters exposed for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub persistent_jobs: u64,
    pub traditional_jobs: u64,
    pub fallbacks: u64,
}

/// Chooses between the persistent worker and the one-shot path.
///
/// Starts in [`Mode::Uninitialized`]. [`ModeSelector::initialize`] probes the
/// persistent transport, auto-starting the supervised worker if allowed. A
/// transport failure in persistent mode demotes the selector to traditional
/// mode for the rest of the process lifetime.
pub struct ModeSelector {
    persistent: Arc<dyn InferenceTransport>,
    traditional: Arc<dyn InferenceTransport>,
    supervisor: Option<Arc<WorkerSupervisor>>,
    config: DispatchConfig,
    mode: AtomicU8,
    persistent_available: AtomicBool,
    state: Mutex<()>,
    sessions: StdMutex<HashMap<String, SessionEntry>>,
    persistent_jobs: AtomicU64,
    traditional_jobs: AtomicU64,
    fallbacks: AtomicU64,
}

impl std::fmt::Debug for ModeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeSelector")
            .field("persistent", &self.persistent.name())
            .field("traditional", &self.traditional.name())
            .field("mode", &self.mode())
            .finish()
    }
}

impl ModeSelector {
    pub fn new(
        persistent: Arc<dyn InferenceTransport>,
        traditional: Arc<dyn InferenceTransport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            persistent,
            traditional,
            supervisor: None,
            config,
            mode: AtomicU8::new(Mode::Uninitialized.as_u8()),
            persistent_available: AtomicBool::new(false),
            state: Mutex::new(()),
            sessions: StdMutex::new(HashMap::new()),
            persistent_jobs: AtomicU64::new(0),
            traditional_jobs: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Attaches the supervisor used for auto-start and shutdown.
    pub fn with_supervisor(mut self, supervisor: Arc<WorkerSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn supervisor(&self) -> Option<&Arc<WorkerSupervisor>> {
        self.supervisor.as_ref()
    }

    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire)).unwrap_or(Mode::Uninitialized)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            persistent_jobs: self.persistent_jobs.load(Ordering::Relaxed),
            traditional_jobs: self.traditional_jobs.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    fn set_mode(&self, mode: Mode) {
        self.mode.store(mode.as_u8(), Ordering::Release);
    }

    /// Probes the persistent path and settles on a mode.
    pub async fn initialize(&self) -> Mode {
        let _state = self.state.lock().await;
        self.set_mode(Mode::ProbingPersistent);

        let mut reachable = match self.persistent.probe().await {
            Ok(()) => true,
            Err(e) => {
                debug!(transport = self.persistent.name(), error = %e, "persistent probe failed");
                false
            }
        };

        if !reachable && self.config.auto_start {
            if let Some(supervisor) = &self.supervisor {
                reachable = self.start_and_probe(supervisor).await;
            }
        }

        if reachable {
            if let Some(supervisor) = &self.supervisor {
                supervisor.mark_running().await;
            }
            self.persistent_available.store(true, Ordering::Release);
            self.set_mode(Mode::PersistentActive);
            info!(transport = self.persistent.name(), "persistent mode active");
        } else {
            self.persistent_available.store(false, Ordering::Release);
            self.set_mode(Mode::TraditionalActive);
            warn!(
                transport = self.persistent.name(),
                "persistent worker unreachable; using traditional mode"
            );
        }
        self.mode()
    }

    async fn start_and_probe(&self, supervisor: &WorkerSupervisor) -> bool {
        let config = supervisor.config();
        match supervisor.start_worker(config.port, &config.device).await {
            Ok(status) => info!(pid = status.pid, port = status.port, "worker auto-started"),
            Err(e) => {
                warn!(error = %e, "worker auto-start failed");
                return false;
            }
        }
        for attempt in 0..self.config.probe_attempts.max(1) {
            match self.persistent.probe().await {
                Ok(()) => return true,
                Err(e) => debug!(attempt, error = %e, "worker not ready yet"),
            }
            tokio::time::sleep(self.config.probe_interval()).await;
        }
        false
    }

    /// Runs `job`, preferring the persistent worker.
    ///
    /// A failed persistent attempt is retried once on the traditional path.
    /// Only transport failures demote the selector.
    pub async fn dispatch(&self, job: &InferenceJob) -> Result<Dispatched, DispatchError> {
        let session_lock = job
            .session
            .as_ref()
            .and_then(|binding| self.touch(&binding.session_id));
        let _serial = match &session_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let mut fell_back = false;
        if self.persistent_available.load(Ordering::Acquire) {
            match self.persistent.execute(job).await {
                Ok(result) => {
                    self.persistent_jobs.fetch_add(1, Ordering::Relaxed);
                    return Ok(Dispatched {
                        result,
                        mode: Mode::PersistentActive,
                        fell_back: false,
                    });
                }
                Err(e) if e.is_transport() => {
                    self.demote(&e).await;
                }
                Err(e) => {
                    warn!(template_id = %job.template_id, error = %e, "persistent worker rejected job; retrying once on traditional path");
                }
            }
            fell_back = true;
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }

        let result = self.traditional.execute(job).await.map_err(|e| match e {
            IpcError::Worker(message) => DispatchError::Worker(message),
            e if e.is_transport() => DispatchError::Unavailable(e.to_string()),
            e => DispatchError::Worker(e.to_string()),
        })?;
        self.traditional_jobs.fetch_add(1, Ordering::Relaxed);
        Ok(Dispatched {
            result,
            mode: Mode::TraditionalActive,
            fell_back,
        })
    }

    async fn demote(&self, cause: &IpcError) {
        let _state = self.state.lock().await;
        if self.persistent_available.swap(false, Ordering::AcqRel) {
            self.set_mode(Mode::TraditionalActive);
            warn!(
                transport = self.persistent.name(),
                error = %cause,
                "persistent worker unreachable; switching to traditional mode"
            );
            if let Some(supervisor) = &self.supervisor {
                if !supervisor.is_running().await {
                    warn!("supervised worker is no longer running");
                }
            }
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self, session_id: &str) -> Option<Arc<Mutex<()>>> {
        let mut sessions = self.sessions();
        let entry = sessions.get_mut(session_id)?;
        entry.session.touch();
        Some(entry.lock.clone())
    }

    /// Registers a session and opens worker-side state when persistent.
    pub async fn open_session(&self, session_id: &str, template_id: &str) -> Result<Session, DispatchError> {
        let mut remote = false;
        if self.persistent_available.load(Ordering::Acquire) {
            match self.persistent.open_session(session_id, template_id).await {
                Ok(()) => remote = true,
                Err(e) if e.is_transport() => self.demote(&e).await,
                Err(e) => return Err(DispatchError::Worker(e.to_string())),
            }
        }

        let session = Session::new(session_id, template_id);
        self.sessions().insert(
            session_id.to_string(),
            SessionEntry {
                session: session.clone(),
                lock: Arc::new(Mutex::new(())),
                remote,
            },
        );
        info!(session_id, template_id, remote, "session opened");
        Ok(session)
    }

    /// Looks up a session without touching it.
    pub fn session(&self, session_id: &str) -> Result<Session, DispatchError> {
        self.sessions()
            .get(session_id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| DispatchError::UnknownSession(session_id.to_string()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Ends a session. Returns whether it was known; unknown ids are a no-op.
    ///
    /// Waits for the session's in-flight job, then releases worker-side state
    /// if any was opened, whatever the current mode.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let Some(entry) = self.sessions().remove(session_id) else {
            return false;
        };
        let _serial = entry.lock.lock().await;
        if entry.remote {
            if let Err(e) = self.persistent.close_session(session_id).await {
                warn!(session_id, error = %e, "failed to release worker session");
            }
        }
        info!(session_id, "session closed");
        true
    }

    /// Closes every session idle for longer than `max_idle`.
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<String> {
        let mut reaped = Vec::new();
        for id in self.idle_sessions(max_idle) {
            if self.close_session(&id).await {
                reaped.push(id);
            }
        }
        reaped
    }

    /// Ids of sessions idle for longer than `max_idle`.
    pub fn idle_sessions(&self, max_idle: Duration) -> Vec<String> {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::days(365));
        let now = chrono::Utc::now();
        self.sessions()
            .iter()
            .filter(|(_, entry)| entry.session.is_idle(now, max_idle))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Closes every session and stops the supervised worker.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions().keys().cloned().collect();
        for id in &ids {
            self.close_session(id).await;
        }
        if let Some(supervisor) = &self.supervisor {
            supervisor.stop_worker().await;
        }
        info!(sessions = ids.len(), "dispatcher shut down");
    }
}
