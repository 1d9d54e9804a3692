//! Execution mode selection for video-generation jobs.
//!
//! [`ModeSelector`] sends jobs to a warm persistent worker when one is
//! reachable and falls back to running the inference command once per job
//! ([`OneShotTransport`]) when it is not. Callers only ever see
//! [`DispatchError`]; transport details stay inside this crate.

mod config;
mod error;
mod oneshot;
mod selector;

pub use config::{DispatchConfig, OneShotConfig};
pub use error::DispatchError;
pub use oneshot::OneShotTransport;
pub use selector::{DispatchStats, Dispatched, ModeSelector};
