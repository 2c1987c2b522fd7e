use anyhow::{Context, Result};
use bytes::Bytes;
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::backend::{CaptureBackend, PlaybackBackend};
use super::chunk::{AudioChunk, ChunkSender};
use crate::error::{SessionError, SessionResult};

/// 16-bit PCM audio loaded from a WAV file
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved little-endian i16 samples
    pub pcm: Bytes,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            pcm: Bytes::from(pcm),
        })
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * 2
    }

    /// Bytes carried by one chunk of `duration`, aligned to whole sample frames
    pub fn chunk_bytes(&self, duration: Duration) -> usize {
        let frame_bytes = self.channels.max(1) as usize * 2;
        let raw = (self.bytes_per_second() as u128 * duration.as_millis() / 1000) as usize;
        (raw / frame_bytes).max(1) * frame_bytes
    }
}

/// Capture backend replaying a WAV file at real-time cadence
pub struct FileCaptureBackend {
    path: PathBuf,
    device_id: String,
    looping: bool,
    audio: Option<AudioFile>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl FileCaptureBackend {
    pub fn new(path: PathBuf, looping: bool) -> Self {
        let device_id = format!("file:{}", path.display());
        Self {
            path,
            device_id,
            looping,
            audio: None,
            stop_tx: None,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileCaptureBackend {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn request_permission(&mut self) -> SessionResult<()> {
        if self.audio.is_some() {
            return Ok(());
        }

        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .map_err(|e| SessionError::DeviceUnavailable(format!("loader panicked: {}", e)))?
            .map_err(|e| SessionError::DeviceUnavailable(format!("{:#}", e)))?;

        self.audio = Some(audio);
        Ok(())
    }

    async fn start(&mut self, mut sink: ChunkSender, chunk_duration: Duration) -> SessionResult<()> {
        if self.task.is_some() {
            return Err(SessionError::CaptureFailed("already capturing".to_string()));
        }

        let audio = self.audio.clone().ok_or_else(|| {
            SessionError::DeviceUnavailable(format!("{} was not acquired", self.device_id))
        })?;
        let chunk_bytes = audio.chunk_bytes(chunk_duration);
        let looping = self.looping;
        let (stop_tx, mut stop_rx) = watch::channel(false);

        info!(
            "Starting file capture from {} ({} bytes per {}ms chunk)",
            audio.path,
            chunk_bytes,
            chunk_duration.as_millis()
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(chunk_duration);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut offset = 0usize;

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                if offset >= audio.pcm.len() {
                    if !looping || audio.pcm.is_empty() {
                        info!("File capture reached end of {}", audio.path);
                        break;
                    }
                    offset = 0;
                }

                let end = (offset + chunk_bytes).min(audio.pcm.len());
                let payload = audio.pcm.slice(offset..end);
                offset = end;

                let sent = tokio::select! {
                    _ = stop_rx.changed() => break,
                    sent = sink.send(payload) => sent,
                };
                if !sent {
                    break;
                }
            }

            debug!("File capture task exited after {} chunks", sink.sent());
        });

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
        Ok(())
    }

    async fn stop(&mut self) -> SessionResult<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("File capture task ended abnormally: {}", e);
            }
        }

        Ok(())
    }

    async fn release(&mut self) {
        self.audio = None;
    }

    fn name(&self) -> &str {
        "WAV file capture"
    }
}

/// Playback backend appending received audio to a raw file
///
/// Each chunk holds the device for as long as it would take to play at
/// `bytes_per_second`.
pub struct FilePlaybackBackend {
    path: PathBuf,
    device_id: String,
    bytes_per_second: u32,
    file: Option<tokio::fs::File>,
}

impl FilePlaybackBackend {
    pub fn new(path: PathBuf, bytes_per_second: u32) -> Self {
        let device_id = format!("file:{}", path.display());
        Self {
            path,
            device_id,
            bytes_per_second,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Wall-clock time needed to play `len` bytes
pub fn play_duration(len: usize, bytes_per_second: u32) -> Duration {
    if bytes_per_second == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(len as f64 / bytes_per_second as f64)
}

#[async_trait::async_trait]
impl PlaybackBackend for FilePlaybackBackend {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn open(&mut self) -> SessionResult<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SessionError::DeviceUnavailable(format!("{}: {}", self.path.display(), e)))?;

        info!("Playback output opened: {}", self.path.display());
        self.file = Some(file);
        Ok(())
    }

    async fn play(&mut self, chunk: &AudioChunk) -> SessionResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SessionError::PlaybackFailed("output is not open".to_string()))?;

        file.write_all(chunk.data())
            .await
            .map_err(|e| SessionError::PlaybackFailed(e.to_string()))?;

        let duration = play_duration(chunk.len(), self.bytes_per_second);
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }

        Ok(())
    }

    async fn halt(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.flush().await {
                warn!("Failed to flush playback output: {}", e);
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                warn!("Failed to flush playback output on close: {}", e);
            }
            info!("Playback output closed: {}", self.path.display());
        }
    }

    fn name(&self) -> &str {
        "raw file playback"
    }
}
