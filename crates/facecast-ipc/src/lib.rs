//! Client side of the two worker protocols.
//!
//! The framed socket protocol sends one length-prefixed JSON request per job
//! over a persistent TCP connection. The HTTP control protocol drives
//! workers that keep per-session state between segments. Both sit behind
//! [`InferenceTransport`], which is all the dispatcher sees.

pub mod codec;
mod error;
mod http;
mod socket;
mod transport;
pub mod wire;

pub use error::IpcError;
pub use http::{HttpControlClient, HttpSession, HttpTransport};
pub use socket::{SocketConfig, SocketTransport};
pub use transport::InferenceTransport;
pub use wire::{HealthReport, WireRequest, WireResponse};
