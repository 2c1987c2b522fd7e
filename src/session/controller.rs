use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::state::{SessionState, SessionStatus};
use super::stats::SessionStats;
use crate::audio::{
    AudioCaptureSource, AudioChunk, CaptureBackend, LeaseRegistry, PlaybackBackend,
    PlaybackCounters, PlaybackQueue, PlaybackSink,
};
use crate::error::{ErrorKind, SessionError, SessionResult};
use crate::transport::{InboundFrames, SessionTarget, TransportChannel};

/// Devices a session takes ownership of
pub struct SessionDevices {
    pub capture: Box<dyn CaptureBackend>,
    pub playback: Box<dyn PlaybackBackend>,
    /// Registry shared by every session that may contend for these devices
    pub leases: LeaseRegistry,
}

/// A live duplex voice session
///
/// Binds microphone capture, the voice service connection and speaker
/// playback. All lifecycle transitions are serialized; `stop` may be called
/// at any time, including while `start` is still initializing.
pub struct SessionController {
    shared: Arc<Shared>,
}

struct Shared {
    target: SessionTarget,
    config: SessionConfig,
    status: watch::Sender<SessionStatus>,
    /// Raised by `stop` before it queues for the lifecycle lock, so an
    /// in-flight `start` can abandon initialization
    stop_requested: watch::Sender<bool>,
    history: StdMutex<Vec<SessionState>>,
    started_at: StdMutex<Option<DateTime<Utc>>>,
    closed_at: StdMutex<Option<DateTime<Utc>>>,
    counters: Arc<StreamCounters>,
    playback_counters: Arc<PlaybackCounters>,
    resources: Mutex<Resources>,
}

#[derive(Debug, Default)]
struct StreamCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

struct Resources {
    capture: AudioCaptureSource,
    playback: PlaybackSink,
    /// Capture → transport task; yields the channel back once capture ends
    outbound: Option<JoinHandle<TransportChannel>>,
    /// Transport → playback task
    inbound: Option<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(target: SessionTarget, devices: SessionDevices, config: SessionConfig) -> Self {
        let capture = AudioCaptureSource::new(
            devices.capture,
            devices.leases.clone(),
            config.capture.clone(),
        );
        let playback = PlaybackSink::new(devices.playback, devices.leases, config.playback.clone());
        let playback_counters = playback.counters();

        let (status, _) = watch::channel(SessionStatus::idle());
        let (stop_requested, _) = watch::channel(false);

        info!("Created voice session {}", target.session_id);

        Self {
            shared: Arc::new(Shared {
                target,
                config,
                status,
                stop_requested,
                history: StdMutex::new(vec![SessionState::Idle]),
                started_at: StdMutex::new(None),
                closed_at: StdMutex::new(None),
                counters: Arc::new(StreamCounters::default()),
                playback_counters,
                resources: Mutex::new(Resources {
                    capture,
                    playback,
                    outbound: None,
                    inbound: None,
                }),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.shared.target.session_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.status.borrow().connected
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.shared.status.borrow().last_error
    }

    /// Watch state, connectivity and error changes
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// Resolve once the session has reached `Closed`
    pub async fn closed(&self) {
        let mut status = self.subscribe();
        let _ = status.wait_for(|status| status.state.is_terminal()).await;
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }

    /// Acquire the microphone, connect, and start streaming both ways
    ///
    /// Returns the current state without side effects when the session is
    /// already initializing or active. A closed session cannot be restarted.
    /// The microphone is acquired before the connection opens, so startup
    /// latency is the sum of the permission prompt and the connect.
    pub async fn start(&self) -> SessionResult<SessionState> {
        let shared = &self.shared;
        let mut resources = shared.resources.lock().await;

        match shared.state() {
            SessionState::Idle => {}
            state @ (SessionState::Initializing | SessionState::Active) => {
                debug!("Session {} already started ({:?})", shared.session_id(), state);
                return Ok(state);
            }
            SessionState::Stopping | SessionState::Closed => {
                return Err(SessionError::SessionClosed);
            }
        }

        info!("Starting voice session {}", shared.session_id());
        shared.set_state(SessionState::Initializing);
        *lock(&shared.started_at) = Some(Utc::now());

        let mut stop_rx = shared.stop_requested.subscribe();
        let initialized = if *stop_rx.borrow_and_update() {
            None
        } else {
            let init = shared.initialize(&mut resources.capture);
            tokio::select! {
                biased;
                _ = stop_rx.changed() => None,
                result = init => Some(result),
            }
        };

        let channel = match initialized {
            Some(Ok(channel)) => channel,
            Some(Err(e)) => {
                error!("Session {} failed to start: {}", shared.session_id(), e);
                resources.capture.release().await;
                shared.record_error(&e);
                shared.set_state(SessionState::Closed);
                return Err(e);
            }
            None => {
                info!(
                    "Stop requested while session {} was initializing",
                    shared.session_id()
                );
                // Anything the abandoned initialization opened is released here
                resources.capture.release().await;
                shared.set_state(SessionState::Closed);
                return Err(SessionError::SessionClosed);
            }
        };

        if let Err(e) = shared.activate(&mut resources, channel).await {
            error!("Session {} failed to activate: {}", shared.session_id(), e);
            resources.capture.release().await;
            resources.playback.stop().await;
            shared.record_error(&e);
            shared.set_state(SessionState::Closed);
            return Err(e);
        }

        Ok(SessionState::Active)
    }

    /// Tear the session down and release every device and the connection
    ///
    /// Never fails; teardown problems are logged. A no-op on idle or closed
    /// sessions.
    pub async fn stop(&self) -> SessionStats {
        self.shared.shutdown(None).await
    }
}

impl Shared {
    fn session_id(&self) -> &str {
        &self.target.session_id
    }

    fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state();
        debug_assert!(
            previous.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            previous,
            next
        );

        self.status.send_modify(|status| {
            status.state = next;
            status.connected = next == SessionState::Active;
        });
        lock(&self.history).push(next);
        if next == SessionState::Closed {
            *lock(&self.closed_at) = Some(Utc::now());
        }

        info!("Session {}: {:?} -> {:?}", self.session_id(), previous, next);
    }

    fn record_error(&self, error: &SessionError) {
        self.status.send_modify(|status| status.record_error(error));
    }

    /// Take the microphone, then open the connection
    ///
    /// Permission comes first so a refusal never opens an authenticated
    /// connection.
    async fn initialize(&self, capture: &mut AudioCaptureSource) -> SessionResult<TransportChannel> {
        capture.acquire().await?;
        TransportChannel::connect(&self.config.transport, &self.target).await
    }

    /// Wire capture → transport and transport → playback
    ///
    /// On error the channel has already been closed.
    async fn activate(
        self: &Arc<Self>,
        resources: &mut Resources,
        mut channel: TransportChannel,
    ) -> SessionResult<()> {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();

        resources.playback.report_to(fault_tx.clone());
        let queue = match resources.playback.queue() {
            Ok(queue) => queue,
            Err(e) => {
                channel.close().await;
                return Err(e);
            }
        };

        let inbound = match channel.take_inbound() {
            Some(inbound) => inbound,
            None => {
                channel.close().await;
                return Err(SessionError::StreamTerminated(
                    "inbound stream unavailable".to_string(),
                ));
            }
        };

        let captured = match resources.capture.start_capturing().await {
            Ok(captured) => captured,
            Err(e) => {
                channel.close().await;
                return Err(e);
            }
        };

        resources.outbound = Some(tokio::spawn(forward_outbound(
            captured,
            channel,
            fault_tx.clone(),
            Arc::clone(&self.counters),
        )));
        resources.inbound = Some(tokio::spawn(forward_inbound(
            inbound,
            queue,
            fault_tx,
            Arc::clone(&self.counters),
        )));
        tokio::spawn(supervise(fault_rx, Arc::downgrade(self)));

        self.set_state(SessionState::Active);
        Ok(())
    }

    async fn shutdown(&self, fault: Option<SessionError>) -> SessionStats {
        self.stop_requested.send_replace(true);
        let mut resources = self.resources.lock().await;

        match self.state() {
            SessionState::Idle => {
                // Nothing was started; a later start() must not see this request
                self.stop_requested.send_replace(false);
                debug!("Stop on idle session {} ignored", self.session_id());
                return self.stats();
            }
            // start() holds the lock for the whole of Initializing
            SessionState::Initializing | SessionState::Stopping | SessionState::Closed => {
                return self.stats();
            }
            SessionState::Active => {}
        }

        match &fault {
            Some(fault) => {
                error!("Session {} failed: {}", self.session_id(), fault);
                self.record_error(fault);
            }
            None => info!("Stopping voice session {}", self.session_id()),
        }

        self.set_state(SessionState::Stopping);
        resources
            .teardown(self.config.stop_step_timeout, self.session_id())
            .await;
        self.set_state(SessionState::Closed);
        drop(resources);

        let stats = self.stats();
        info!(
            "Session {} closed ({} sent, {} received, {} played, {:.1}s)",
            stats.session_id,
            stats.chunks_sent,
            stats.chunks_received,
            stats.chunks_played,
            stats.duration_secs
        );
        stats
    }

    fn stats(&self) -> SessionStats {
        let status = self.status.borrow().clone();
        let started_at = *lock(&self.started_at);
        let ended_at = lock(&self.closed_at).unwrap_or_else(Utc::now);
        let duration_secs = started_at
            .map(|started| ended_at.signed_duration_since(started).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            session_id: self.target.session_id.clone(),
            state: status.state,
            connected: status.connected,
            last_error: status.last_error,
            started_at,
            duration_secs,
            chunks_sent: self.counters.sent.load(Ordering::SeqCst),
            chunks_received: self.counters.received.load(Ordering::SeqCst),
            chunks_played: self.playback_counters.played(),
            playback_failures: self.playback_counters.failed(),
            transitions: lock(&self.history).clone(),
        }
    }
}

impl Resources {
    /// Release capture, then the connection, then playback
    ///
    /// Every step runs even when an earlier one failed or timed out.
    async fn teardown(&mut self, step_timeout: Duration, session_id: &str) {
        match tokio::time::timeout(step_timeout, self.capture.stop_capturing()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Capture stop failed for session {}: {}", session_id, e),
            Err(_) => warn!("Capture stop timed out for session {}", session_id),
        }
        self.capture.release().await;

        if let Some(mut outbound) = self.outbound.take() {
            match tokio::time::timeout(step_timeout, &mut outbound).await {
                Ok(Ok(mut channel)) => channel.close().await,
                Ok(Err(e)) => warn!("Outbound task for session {} failed: {}", session_id, e),
                Err(_) => {
                    warn!(
                        "Outbound drain timed out for session {}; dropping connection",
                        session_id
                    );
                    outbound.abort();
                }
            }
        }

        if let Some(inbound) = self.inbound.take() {
            inbound.abort();
        }

        self.playback.stop().await;
    }
}

/// Send captured chunks in capture order until capture ends or a send fails
async fn forward_outbound(
    mut captured: mpsc::Receiver<AudioChunk>,
    mut channel: TransportChannel,
    faults: mpsc::UnboundedSender<SessionError>,
    counters: Arc<StreamCounters>,
) -> TransportChannel {
    while let Some(chunk) = captured.recv().await {
        if let Err(e) = channel.send(&chunk).await {
            let _ = faults.send(e);
            return channel;
        }
        counters.sent.fetch_add(1, Ordering::SeqCst);
    }

    // Also reached during a normal stop, where the session is no longer
    // active and the fault is ignored
    let _ = faults.send(SessionError::CaptureFailed(
        "capture stream ended".to_string(),
    ));
    channel
}

/// Queue received chunks for playback in receipt order
async fn forward_inbound(
    mut inbound: InboundFrames,
    queue: PlaybackQueue,
    faults: mpsc::UnboundedSender<SessionError>,
    counters: Arc<StreamCounters>,
) {
    while let Some(frame) = inbound.recv().await {
        match frame {
            Ok(chunk) => {
                counters.received.fetch_add(1, Ordering::SeqCst);
                if queue.enqueue(chunk).await.is_err() {
                    debug!("Playback stopped; discarding inbound audio");
                    return;
                }
            }
            Err(e) => {
                let _ = faults.send(e);
                return;
            }
        }
    }
}

/// Turn the first fatal fault into a shutdown; record the rest
async fn supervise(mut faults: mpsc::UnboundedReceiver<SessionError>, shared: Weak<Shared>) {
    while let Some(fault) = faults.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };

        if fault.is_fatal() {
            shared.shutdown(Some(fault)).await;
            return;
        }

        warn!("Session {}: {}", shared.session_id(), fault);
        shared.record_error(&fault);
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
