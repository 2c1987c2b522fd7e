use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SessionError};

/// Session lifecycle
///
/// Moves strictly forward: Idle → Initializing → Active → Stopping → Closed.
/// Initializing may jump straight to Closed when startup fails or is
/// cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Initializing,
    Active,
    Stopping,
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Initializing, Active)
                | (Initializing, Closed)
                | (Active, Stopping)
                | (Stopping, Closed)
        )
    }
}

/// What the UI layer observes about a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub connected: bool,
    pub last_error: Option<ErrorKind>,
    pub last_error_message: Option<String>,
}

impl SessionStatus {
    pub(crate) fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            connected: false,
            last_error: None,
            last_error_message: None,
        }
    }

    pub(crate) fn record_error(&mut self, error: &SessionError) {
        self.last_error = Some(error.kind());
        self.last_error_message = Some(error.to_string());
    }
}
