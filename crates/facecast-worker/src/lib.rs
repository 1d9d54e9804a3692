//! Supervision of out-of-process inference workers.
//!
//! A worker is a long-lived process (typically a Python model server) that
//! listens on a TCP port and renders lip-synced video. This crate launches
//! it, waits until the port answers, observes its exit, and tears it down
//! again, killing the whole process tree when a graceful stop is ignored.
//!
//! Before every launch the supervisor sweeps the target and reserved ports
//! for stale workers. Anything that looks like a worker, and anything that
//! simply holds one of the ports, is terminated. Process identification is
//! behind [`ProcessInspector`] so tests and other platforms can swap it.
//!
//! The supervisor never respawns on its own: restart policy belongs to the
//! dispatcher that owns it.

mod claims;
mod config;
mod error;
mod inspect;
mod supervisor;

pub use claims::PortClaims;
pub use config::{DeviceConfig, WorkerConfig};
pub use error::SupervisorError;
pub use inspect::{find_conflicts, Conflict, ConflictReason, ProcessInfo, ProcessInspector, SystemInspector};
pub use supervisor::{emergency_cleanup_ports, WorkerSupervisor};
