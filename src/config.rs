use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{CaptureConfig, CaptureSource, PlaybackConfig, PlaybackTarget};
use crate::session::SessionConfig;
use crate::transport::TransportConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub audio: AudioSection,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub inbound_queue: usize,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8787/ws/voice".to_string(),
            connect_timeout_ms: 10_000,
            close_timeout_ms: 2_000,
            inbound_queue: 64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub chunk_ms: u64,
    pub capture_queue: usize,
    pub playback_queue: usize,
    /// Rate used to derive how long a received chunk occupies the speaker
    pub playback_bytes_per_second: u32,
    pub input_path: String,
    pub input_loop: bool,
    pub output_dir: String,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            chunk_ms: 100,
            capture_queue: 32,
            playback_queue: 64,
            playback_bytes_per_second: 32_000, // 16kHz mono i16
            input_path: "audio/input.wav".to_string(),
            input_loop: true,
            output_dir: "audio/playback".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub stop_step_timeout_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            stop_step_timeout_ms: 2_000,
        }
    }
}

impl Config {
    /// Load from `path` (extension optional), overridable by
    /// `VOICE_SESSION__SECTION__KEY` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VOICE_SESSION").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            transport: TransportConfig {
                endpoint: self.transport.endpoint.clone(),
                connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
                close_timeout: Duration::from_millis(self.transport.close_timeout_ms),
                inbound_capacity: self.transport.inbound_queue,
            },
            capture: CaptureConfig {
                chunk_duration: Duration::from_millis(self.audio.chunk_ms),
                queue_capacity: self.audio.capture_queue,
            },
            playback: PlaybackConfig {
                queue_capacity: self.audio.playback_queue,
            },
            stop_step_timeout: Duration::from_millis(self.session.stop_step_timeout_ms),
        }
    }

    pub fn capture_source(&self) -> CaptureSource {
        CaptureSource::File {
            path: PathBuf::from(&self.audio.input_path),
            looping: self.audio.input_loop,
        }
    }

    pub fn playback_target(&self) -> PlaybackTarget {
        PlaybackTarget::File {
            dir: PathBuf::from(&self.audio.output_dir),
            bytes_per_second: self.audio.playback_bytes_per_second,
        }
    }
}
