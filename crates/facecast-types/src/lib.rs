//! Shared types for the Facecast talking-head pipeline.
//!
//! This crate holds the data model every other Facecast crate speaks:
//! worker lifecycle states, the execution mode of the dispatcher, the
//! immutable inference job and its result, the per-caller session record,
//! and the per-sentence pipeline task and the segment delivered to callers.
//!
//! Nothing here performs I/O. Keeping the model in one leaf crate lets the
//! supervisor, the IPC layer, the dispatcher and the pipeline agree on the
//! same values without depending on each other.

use serde::{Deserialize, Serialize};

mod job;
mod segment;
mod session;

pub use job::{InferenceJob, InferenceResult, SessionBinding, DEFAULT_BATCH_SIZE, DEFAULT_FPS};
pub use segment::{PipelineTask, StreamSegment, TaskState};
pub use session::Session;

/// Lifecycle state of a supervised worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// The process was spawned but its port has not answered yet.
    Starting,
    /// A TCP connection to the worker port succeeded.
    Listening,
    /// The worker answered a protocol-level health probe.
    Running,
    /// The process exited on its own.
    Exited,
    /// The process was terminated by the supervisor.
    Killed,
}

impl WorkerState {
    /// Returns `true` for the states in which jobs may be dispatched.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Listening | Self::Running)
    }

    /// Returns the string label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Killed => "killed",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a supervised worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// OS process id of the worker.
    pub pid: u32,
    /// Port the worker listens on.
    pub port: u16,
    /// Current lifecycle state.
    pub state: WorkerState,
    /// Number of times the supervisor has launched a worker.
    pub launches: u32,
}

/// Execution mode of the dispatcher.
///
/// Transitions only move forward within a process lifetime:
/// `Uninitialized -> ProbingPersistent -> PersistentActive | TraditionalActive`,
/// and `PersistentActive -> TraditionalActive` when the persistent worker
/// becomes unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Mode {
    /// No probe has run yet.
    Uninitialized = 0,
    /// The persistent worker is being probed (and possibly launched).
    ProbingPersistent = 1,
    /// Jobs go to the long-lived worker.
    PersistentActive = 2,
    /// Jobs go through the one-shot path.
    TraditionalActive = 3,
}

impl Mode {
    /// Returns the numeric code for this mode.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Attempts to convert a numeric code to a `Mode`.
    ///
    /// Returns `None` if the code does not correspond to a known mode.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Uninitialized),
            1 => Some(Self::ProbingPersistent),
            2 => Some(Self::PersistentActive),
            3 => Some(Self::TraditionalActive),
            _ => None,
        }
    }

    /// Returns the string label for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::ProbingPersistent => "probing_persistent",
            Self::PersistentActive => "persistent",
            Self::TraditionalActive => "traditional",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
