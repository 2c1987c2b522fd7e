//! Voice session management
//!
//! This module provides the `SessionController` state machine that manages:
//! - Microphone capture streamed to the voice service
//! - Voice service audio played back through the speaker
//! - Lifecycle transitions, fault propagation and teardown
//! - Session statistics and observable status

mod config;
mod controller;
mod settings;
mod state;
mod stats;

pub use config::SessionConfig;
pub use controller::{SessionController, SessionDevices};
pub use settings::{SettingsContext, VoicePersona};
pub use state::{SessionState, SessionStatus};
pub use stats::SessionStats;
