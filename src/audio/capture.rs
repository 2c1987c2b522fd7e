use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{CaptureBackend, CaptureConfig};
use super::chunk::{chunk_channel, AudioChunk};
use super::lease::{DeviceLease, LeaseRegistry};
use crate::error::{SessionError, SessionResult};

/// Microphone owner for one session
///
/// Holds the device lease between `acquire` and `stop_capturing`/`release`.
/// A stopped source must be acquired again before it can capture.
pub struct AudioCaptureSource {
    backend: Box<dyn CaptureBackend>,
    leases: LeaseRegistry,
    config: CaptureConfig,
    lease: Option<DeviceLease>,
    /// Set while a permission request is in flight, so an interrupted
    /// acquisition still gets its backend released
    pending: bool,
    capturing: bool,
}

impl AudioCaptureSource {
    pub fn new(backend: Box<dyn CaptureBackend>, leases: LeaseRegistry, config: CaptureConfig) -> Self {
        Self {
            backend,
            leases,
            config,
            lease: None,
            pending: false,
            capturing: false,
        }
    }

    pub fn device_id(&self) -> &str {
        self.backend.device_id()
    }

    pub fn is_acquired(&self) -> bool {
        self.lease.is_some()
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Request permission and take the device lease
    ///
    /// Returns immediately when the lease is already held.
    pub async fn acquire(&mut self) -> SessionResult<()> {
        if self.lease.is_some() {
            debug!("Capture device {} already acquired", self.device_id());
            return Ok(());
        }

        let lease = self.leases.try_acquire(self.backend.device_id())?;

        self.pending = true;
        if let Err(e) = self.backend.request_permission().await {
            warn!("Capture device {} refused: {}", self.device_id(), e);
            // A refused request may still have opened the device
            self.backend.release().await;
            self.pending = false;
            return Err(e);
        }
        self.pending = false;
        self.lease = Some(lease);

        info!(
            "Acquired capture device {} ({})",
            self.device_id(),
            self.backend.name()
        );

        Ok(())
    }

    /// Begin recording
    ///
    /// Returns the receiver of sequenced chunks. It stays open until
    /// `stop_capturing` is called or the backend runs dry.
    pub async fn start_capturing(&mut self) -> SessionResult<mpsc::Receiver<AudioChunk>> {
        if self.lease.is_none() {
            return Err(SessionError::DeviceUnavailable(format!(
                "capture device {} is not acquired",
                self.device_id()
            )));
        }
        if self.capturing {
            return Err(SessionError::CaptureFailed("already capturing".to_string()));
        }

        let (sink, rx) = chunk_channel(self.config.queue_capacity);
        self.backend.start(sink, self.config.chunk_duration).await?;
        self.capturing = true;

        info!(
            "Capturing from {} in {}ms chunks",
            self.device_id(),
            self.config.chunk_duration.as_millis()
        );

        Ok(rx)
    }

    /// Stop recording and release the device
    ///
    /// The device is released even when the backend fails to stop.
    pub async fn stop_capturing(&mut self) -> SessionResult<()> {
        let result = if self.capturing {
            self.capturing = false;
            self.backend.stop().await
        } else {
            Ok(())
        };

        if let Err(e) = &result {
            warn!("Capture backend {} failed to stop: {}", self.device_id(), e);
        }

        self.release().await;
        result
    }

    /// Give the device back. Safe to call repeatedly.
    pub async fn release(&mut self) {
        if self.lease.is_none() && !self.pending {
            return;
        }

        if self.capturing {
            self.capturing = false;
            if let Err(e) = self.backend.stop().await {
                warn!("Capture backend {} failed to stop: {}", self.device_id(), e);
            }
        }

        self.backend.release().await;
        self.pending = false;
        self.lease = None;

        info!("Released capture device {}", self.device_id());
    }
}
