//! Caller session bound to a template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A caller conversation bound to one avatar template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier, shared with the worker when it keeps session state.
    pub session_id: String,
    /// Template (avatar) rendered for this session.
    pub template_id: String,
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
    /// Last time a job ran for this session.
    pub last_used: DateTime<Utc>,
}

impl Session {
    /// Creates a session stamped with the current time.
    pub fn new(session_id: impl Into<String>, template_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            template_id: template_id.into(),
            created_at: now,
            last_used: now,
        }
    }

    /// Records activity on the session.
    pub fn touch(&mut self) {
        self.last_used = Utc::now();
    }

    /// Whether the session has been idle for at least `max_idle`.
    pub fn is_idle(&self, now: DateTime<Utc>, max_idle: chrono::Duration) -> bool {
        now - self.last_used >= max_idle
    }
}
