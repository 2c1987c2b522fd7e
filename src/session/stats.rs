use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;
use crate::error::ErrorKind;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    /// Current lifecycle state
    pub state: SessionState,

    /// Whether the duplex stream is live
    pub connected: bool,

    /// Most recent error, fatal or not
    pub last_error: Option<ErrorKind>,

    /// When `start` was first called
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since `started_at`
    pub duration_secs: f64,

    /// Captured chunks written to the transport
    pub chunks_sent: u64,

    /// Chunks received from the voice service
    pub chunks_received: u64,

    /// Received chunks that finished playing
    pub chunks_played: u64,

    /// Received chunks dropped by playback
    pub playback_failures: u64,

    /// Every state the session has been in, oldest first
    pub transitions: Vec<SessionState>,
}
