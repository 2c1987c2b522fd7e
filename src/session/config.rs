use std::time::Duration;

use crate::audio::{CaptureConfig, PlaybackConfig};
use crate::transport::TransportConfig;

/// Runtime configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub transport: TransportConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,

    /// Upper bound on each teardown step (capture stop, outbound drain)
    /// Default: 2 seconds
    pub stop_step_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            stop_step_timeout: Duration::from_secs(2),
        }
    }
}
