//! Types for the project session.

use serde::{Deserialize, Serialize};

use crate::queue::QueueStatus;

/// Lifecycle of a [`ProjectSession`](super::ProjectSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created; enqueues are held until `begin`.
    #[default]
    Idle,
    /// Dispatching work.
    Active,
    /// Ended; enqueues are ignored and workers return immediately.
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a project session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub estimation: QueueStatus,
    pub render: QueueStatus,
}

impl SessionStatus {
    /// No estimation or render work queued or running.
    pub fn is_idle(&self) -> bool {
        self.estimation.active_jobs == 0
            && self.estimation.queued_jobs == 0
            && self.render.active_jobs == 0
            && self.render.queued_jobs == 0
    }
}
