//! Process-local registry of worker ports owned by supervisors.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared set of ports that some supervisor currently owns.
///
/// Supervisors created from the same `PortClaims` can never both believe they
/// own a port. Uses a synchronous mutex: every acquisition is a single set
/// operation and never spans an `.await`.
#[derive(Debug, Clone, Default)]
pub struct PortClaims {
    inner: Arc<Mutex<HashSet<u16>>>,
}

impl PortClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `port`. Returns `false` if it is already claimed.
    pub fn claim(&self, port: u16) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port)
    }

    /// Releases `port`. Releasing an unclaimed port is a no-op.
    pub fn release(&self, port: u16) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&port);
    }

    pub fn is_claimed(&self, port: u16) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port)
    }
}
