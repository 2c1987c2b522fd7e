//! Session error taxonomy
//!
//! Capture and transport faults end the session; playback faults drop a single
//! chunk and are only reported. `ErrorKind` is the serializable mirror surfaced
//! to callers as `last_error`.

use serde::{Deserialize, Serialize};

/// Errors produced by the capture, playback and transport layers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio capture failed: {0}")]
    CaptureFailed(String),

    #[error("Failed to connect to voice service: {0}")]
    ConnectFailed(String),

    #[error("Failed to send audio frame: {0}")]
    SendFailed(String),

    #[error("Inbound audio stream terminated: {0}")]
    StreamTerminated(String),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    #[error("Session is closed")]
    SessionClosed,
}

/// Error category without the detail message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    DeviceUnavailable,
    CaptureFailed,
    ConnectFailed,
    SendFailed,
    StreamTerminated,
    PlaybackFailed,
    SessionClosed,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::PermissionDenied => ErrorKind::PermissionDenied,
            SessionError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            SessionError::CaptureFailed(_) => ErrorKind::CaptureFailed,
            SessionError::ConnectFailed(_) => ErrorKind::ConnectFailed,
            SessionError::SendFailed(_) => ErrorKind::SendFailed,
            SessionError::StreamTerminated(_) => ErrorKind::StreamTerminated,
            SessionError::PlaybackFailed(_) => ErrorKind::PlaybackFailed,
            SessionError::SessionClosed => ErrorKind::SessionClosed,
        }
    }

    /// Whether this error ends the session
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::PlaybackFailed(_))
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
