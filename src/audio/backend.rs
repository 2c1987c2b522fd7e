use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use super::chunk::{AudioChunk, ChunkSender};
use super::file::{FileCaptureBackend, FilePlaybackBackend};
use crate::error::SessionResult;

/// Configuration for audio capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Duration of audio carried by each chunk (bounds end-to-end latency)
    pub chunk_duration: Duration,
    /// Capacity of the queue between capture and the transport
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_duration: Duration::from_millis(100), // 100ms chunks
            queue_capacity: 32,
        }
    }
}

/// Configuration for audio playback
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Capacity of the pending playback queue
    pub queue_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// Microphone capture backend trait
///
/// Implementations:
/// - File: replays a WAV file at real-time cadence (testing, demos)
/// - Test doubles in `tests/common`
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Stable device identifier used for lease exclusivity
    fn device_id(&self) -> &str;

    /// Ask the user/OS for permission to record
    async fn request_permission(&mut self) -> SessionResult<()>;

    /// Start recording
    ///
    /// Payloads are pushed into `sink` every `chunk_duration` until `stop`
    /// is called or the source runs dry.
    async fn start(&mut self, sink: ChunkSender, chunk_duration: Duration) -> SessionResult<()>;

    /// Stop recording. Succeeds when capture was never started.
    async fn stop(&mut self) -> SessionResult<()>;

    /// Give the device handle back to the OS
    async fn release(&mut self);

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Speaker output backend trait
#[async_trait::async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Stable device identifier used for lease exclusivity
    fn device_id(&self) -> &str;

    /// Open the output device
    async fn open(&mut self) -> SessionResult<()>;

    /// Play one chunk, resolving once it has finished playing
    async fn play(&mut self, chunk: &AudioChunk) -> SessionResult<()>;

    /// Cut off whatever is currently audible
    async fn halt(&mut self);

    /// Close the output device
    async fn close(&mut self);

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Where captured audio comes from
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// 16-bit WAV file replayed in real time
    File { path: PathBuf, looping: bool },
}

/// Where received audio is played
#[derive(Debug, Clone)]
pub enum PlaybackTarget {
    /// Raw output file per session; `bytes_per_second` sets play duration
    File { dir: PathBuf, bytes_per_second: u32 },
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for the given source
    pub fn create_capture(source: &CaptureSource) -> Result<Box<dyn CaptureBackend>> {
        match source {
            CaptureSource::File { path, looping } => {
                Ok(Box::new(FileCaptureBackend::new(path.clone(), *looping)))
            }
        }
    }

    /// Create a playback backend writing this session's output
    pub fn create_playback(
        target: &PlaybackTarget,
        session_id: &str,
    ) -> Result<Box<dyn PlaybackBackend>> {
        match target {
            PlaybackTarget::File {
                dir,
                bytes_per_second,
            } => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create playback directory: {:?}", dir))?;
                let path = dir.join(format!("{}-playback.raw", session_id));
                Ok(Box::new(FilePlaybackBackend::new(path, *bytes_per_second)))
            }
        }
    }
}
