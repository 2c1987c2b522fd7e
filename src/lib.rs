pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod transport;

pub use audio::{
    AudioBackendFactory, AudioCaptureSource, AudioChunk, CaptureBackend, CaptureConfig,
    CaptureSource, LeaseRegistry, PlaybackBackend, PlaybackConfig, PlaybackSink, PlaybackTarget,
};
pub use config::Config;
pub use error::{ErrorKind, SessionError, SessionResult};
pub use http::{create_router, AppState};
pub use session::{
    SessionConfig, SessionController, SessionDevices, SessionState, SessionStats, SessionStatus,
    SettingsContext, VoicePersona,
};
pub use transport::{AuthToken, ChannelState, SessionTarget, TransportChannel, TransportConfig};
