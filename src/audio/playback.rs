use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{PlaybackBackend, PlaybackConfig};
use super::chunk::AudioChunk;
use super::lease::{DeviceLease, LeaseRegistry};
use crate::error::{SessionError, SessionResult};

/// How long `stop` waits for the worker to halt the device before aborting it
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Playback progress counters
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    played: AtomicU64,
    failed: AtomicU64,
}

impl PlaybackCounters {
    pub fn played(&self) -> u64 {
        self.played.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Cloneable handle for feeding the playback queue
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    tx: mpsc::Sender<AudioChunk>,
}

impl PlaybackQueue {
    /// Append a chunk behind everything already queued
    pub async fn enqueue(&self, chunk: AudioChunk) -> SessionResult<()> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| SessionError::PlaybackFailed("playback sink is stopped".to_string()))
    }
}

/// Speaker owner for one session
///
/// A single worker task plays queued chunks one at a time in arrival order.
/// The output device is opened on the first chunk and held until `stop`.
pub struct PlaybackSink {
    backend: Option<Box<dyn PlaybackBackend>>,
    leases: LeaseRegistry,
    config: PlaybackConfig,
    counters: Arc<PlaybackCounters>,
    reporter: Option<mpsc::UnboundedSender<SessionError>>,
    queue: Option<PlaybackQueue>,
    stop_tx: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
    stopped: bool,
}

impl PlaybackSink {
    pub fn new(backend: Box<dyn PlaybackBackend>, leases: LeaseRegistry, config: PlaybackConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            backend: Some(backend),
            leases,
            config,
            counters: Arc::new(PlaybackCounters::default()),
            reporter: None,
            queue: None,
            stop_tx,
            worker: None,
            stopped: false,
        }
    }

    /// Route per-chunk playback failures to `reporter`
    ///
    /// Takes effect for a worker that has not started yet.
    pub fn report_to(&mut self, reporter: mpsc::UnboundedSender<SessionError>) {
        self.reporter = Some(reporter);
    }

    pub fn counters(&self) -> Arc<PlaybackCounters> {
        Arc::clone(&self.counters)
    }

    /// Handle for enqueueing chunks, starting the worker on first use
    pub fn queue(&mut self) -> SessionResult<PlaybackQueue> {
        if let Some(queue) = &self.queue {
            return Ok(queue.clone());
        }

        let backend = match (self.stopped, self.backend.take()) {
            (false, Some(backend)) => backend,
            _ => {
                return Err(SessionError::PlaybackFailed(
                    "playback sink is stopped".to_string(),
                ))
            }
        };

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let worker = tokio::spawn(run_worker(
            backend,
            self.leases.clone(),
            rx,
            self.stop_tx.subscribe(),
            self.reporter.take(),
            Arc::clone(&self.counters),
        ));

        let queue = PlaybackQueue { tx };
        self.queue = Some(queue.clone());
        self.worker = Some(worker);
        Ok(queue)
    }

    /// Append a chunk to the playback queue
    pub async fn enqueue(&mut self, chunk: AudioChunk) -> SessionResult<()> {
        self.queue()?.enqueue(chunk).await
    }

    /// Halt playback, drop everything queued and release the output device
    ///
    /// Safe with an empty queue, mid-playback, or repeatedly.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.stop_tx.send_replace(true);
        self.queue = None;
        self.reporter = None;
        self.backend = None;

        if let Some(mut worker) = self.worker.take() {
            if tokio::time::timeout(WORKER_STOP_TIMEOUT, &mut worker).await.is_err() {
                warn!("Playback worker did not halt in time; aborting");
                worker.abort();
            }
        }

        info!(
            "Playback stopped ({} played, {} failed)",
            self.counters.played(),
            self.counters.failed()
        );
    }
}

async fn run_worker(
    mut backend: Box<dyn PlaybackBackend>,
    leases: LeaseRegistry,
    mut queue_rx: mpsc::Receiver<AudioChunk>,
    mut stop_rx: watch::Receiver<bool>,
    reporter: Option<mpsc::UnboundedSender<SessionError>>,
    counters: Arc<PlaybackCounters>,
) {
    let mut lease: Option<DeviceLease> = None;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            next = queue_rx.recv() => match next {
                Some(chunk) => chunk,
                None => break,
            },
        };

        if lease.is_none() {
            match open_output(backend.as_mut(), &leases).await {
                Ok(acquired) => lease = Some(acquired),
                Err(e) => {
                    // Stale audio is not worth replaying
                    warn!("Dropping chunk {}: {}", chunk.sequence(), e);
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    report(&reporter, e);
                    continue;
                }
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = stop_rx.changed() => None,
            result = backend.play(&chunk) => Some(result),
        };

        match outcome {
            None => {
                debug!("Interrupted playback of chunk {}", chunk.sequence());
                backend.halt().await;
                break;
            }
            Some(Ok(())) => {
                counters.played.fetch_add(1, Ordering::SeqCst);
                debug!("Played chunk {} ({} bytes)", chunk.sequence(), chunk.len());
            }
            Some(Err(e)) => {
                warn!("Playback of chunk {} failed: {}", chunk.sequence(), e);
                counters.failed.fetch_add(1, Ordering::SeqCst);
                report(&reporter, e);
            }
        }
    }

    // Anything still queued is discarded with the receiver
    queue_rx.close();

    if let Some(lease) = lease.take() {
        backend.close().await;
        info!("Released playback device {}", lease.device_id());
    }
}

async fn open_output(
    backend: &mut dyn PlaybackBackend,
    leases: &LeaseRegistry,
) -> SessionResult<DeviceLease> {
    let lease = leases
        .try_acquire(backend.device_id())
        .map_err(|e| SessionError::PlaybackFailed(e.to_string()))?;

    backend
        .open()
        .await
        .map_err(|e| SessionError::PlaybackFailed(e.to_string()))?;

    info!("Opened playback device {} ({})", backend.device_id(), backend.name());
    Ok(lease)
}

fn report(reporter: &Option<mpsc::UnboundedSender<SessionError>>, error: SessionError) {
    let error = match error {
        SessionError::PlaybackFailed(_) => error,
        other => SessionError::PlaybackFailed(other.to_string()),
    };

    if let Some(reporter) = reporter {
        let _ = reporter.send(error);
    }
}
