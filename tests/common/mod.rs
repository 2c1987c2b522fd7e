// Shared test doubles for session integration tests
//
// ScriptedCapture and ScriptedPlayback stand in for the microphone and
// speaker; TestServer is a local websocket voice service that records what
// it receives.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use voice_session::audio::ChunkSender;
use voice_session::{
    AudioChunk, AuthToken, CaptureBackend, CaptureConfig, PlaybackBackend, PlaybackConfig,
    SessionConfig, SessionError, SessionResult, SessionTarget, SettingsContext, TransportConfig,
};

/// Ordered record of notable events across test doubles
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// Decode a scripted capture payload back to its counter
pub fn payload_counter(data: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[..8]);
    u64::from_le_bytes(bytes)
}

// ============================================================================
// Capture
// ============================================================================

#[derive(Debug, Default)]
pub struct CaptureTally {
    pub permission_requests: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub releases: AtomicUsize,
}

impl CaptureTally {
    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Microphone that emits `chunks` payloads, each the little-endian counter
/// 1, 2, 3..., then stays open until stopped (or ends, if `ending`)
pub struct ScriptedCapture {
    device_id: String,
    chunks: u64,
    interval: Duration,
    deny: Option<SessionError>,
    permission_delay: Duration,
    ending: bool,
    tally: Arc<CaptureTally>,
    events: EventLog,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl ScriptedCapture {
    pub fn new(chunks: u64) -> Self {
        Self {
            device_id: "mic:scripted".to_string(),
            chunks,
            interval: Duration::from_millis(5),
            deny: None,
            permission_delay: Duration::ZERO,
            ending: false,
            tally: Arc::new(CaptureTally::default()),
            events: EventLog::default(),
            stop_tx: None,
            task: None,
        }
    }

    pub fn on_device(mut self, device_id: &str) -> Self {
        self.device_id = device_id.to_string();
        self
    }

    pub fn denying(mut self, error: SessionError) -> Self {
        self.deny = Some(error);
        self
    }

    pub fn slow_permission(mut self, delay: Duration) -> Self {
        self.permission_delay = delay;
        self
    }

    /// Close the chunk stream after the last payload instead of idling
    pub fn ending(mut self) -> Self {
        self.ending = true;
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn tally(&self) -> Arc<CaptureTally> {
        Arc::clone(&self.tally)
    }
}

#[async_trait::async_trait]
impl CaptureBackend for ScriptedCapture {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn request_permission(&mut self) -> SessionResult<()> {
        self.tally.permission_requests.fetch_add(1, Ordering::SeqCst);
        if !self.permission_delay.is_zero() {
            tokio::time::sleep(self.permission_delay).await;
        }
        match &self.deny {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn start(&mut self, mut sink: ChunkSender, _chunk_duration: Duration) -> SessionResult<()> {
        self.tally.starts.fetch_add(1, Ordering::SeqCst);
        self.events.push("capture_started");

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let chunks = self.chunks;
        let interval = self.interval;
        let ending = self.ending;

        self.task = Some(tokio::spawn(async move {
            for counter in 1..=chunks {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                if !sink.send(counter.to_le_bytes().to_vec()).await {
                    return;
                }
            }
            if !ending {
                let _ = stop_rx.changed().await;
            }
        }));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    async fn stop(&mut self) -> SessionResult<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.tally.stops.fetch_add(1, Ordering::SeqCst);
        self.events.push("capture_stopped");
        Ok(())
    }

    async fn release(&mut self) {
        self.tally.releases.fetch_add(1, Ordering::SeqCst);
        self.events.push("capture_released");
    }

    fn name(&self) -> &str {
        "scripted capture"
    }
}

// ============================================================================
// Playback
// ============================================================================

#[derive(Debug, Default)]
pub struct PlaybackTally {
    pub played: Mutex<Vec<Vec<u8>>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub halts: AtomicUsize,
    pub overlapped: AtomicBool,
    playing: AtomicBool,
}

impl PlaybackTally {
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn halts(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }
}

/// Speaker that takes `play_time` per chunk and records what it played
pub struct ScriptedPlayback {
    device_id: String,
    play_time: Duration,
    fail_open: bool,
    tally: Arc<PlaybackTally>,
}

impl ScriptedPlayback {
    pub fn new(play_time: Duration) -> Self {
        Self {
            device_id: "speaker:scripted".to_string(),
            play_time,
            fail_open: false,
            tally: Arc::new(PlaybackTally::default()),
        }
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn tally(&self) -> Arc<PlaybackTally> {
        Arc::clone(&self.tally)
    }
}

#[async_trait::async_trait]
impl PlaybackBackend for ScriptedPlayback {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn open(&mut self) -> SessionResult<()> {
        if self.fail_open {
            return Err(SessionError::DeviceUnavailable("speaker unplugged".to_string()));
        }
        self.tally.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn play(&mut self, chunk: &AudioChunk) -> SessionResult<()> {
        if self.tally.playing.swap(true, Ordering::SeqCst) {
            self.tally.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(self.play_time).await;
        self.tally.played.lock().unwrap().push(chunk.data().to_vec());
        self.tally.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn halt(&mut self) {
        self.tally.halts.fetch_add(1, Ordering::SeqCst);
        self.tally.playing.store(false, Ordering::SeqCst);
    }

    async fn close(&mut self) {
        self.tally.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "scripted playback"
    }
}

// ============================================================================
// Voice service
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Binary frames sent to every client right after the handshake
    pub replies: Vec<Vec<u8>>,
    /// Drop the socket without a close handshake after this many frames
    pub drop_after: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ServerLog {
    uris: Mutex<Vec<String>>,
    frames: Mutex<Vec<Vec<u8>>>,
    connections: AtomicUsize,
}

impl ServerLog {
    pub fn uris(&self) -> Vec<String> {
        self.uris.lock().unwrap().clone()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Local websocket voice service
pub struct TestServer {
    pub endpoint: String,
    pub log: Arc<ServerLog>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(options: ServerOptions) -> anyhow::Result<Self> {
        Self::start_with_events(options, EventLog::default()).await
    }

    pub async fn start_with_events(options: ServerOptions, events: EventLog) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let log = Arc::new(ServerLog::default());

        let server_log = Arc::clone(&log);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(
                    stream,
                    options.clone(),
                    Arc::clone(&server_log),
                    events.clone(),
                ));
            }
        });

        Ok(Self {
            endpoint: format!("ws://{}/ws/voice", addr),
            log,
            accept_task,
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(stream: TcpStream, options: ServerOptions, log: Arc<ServerLog>, events: EventLog) {
    let uri_log = Arc::clone(&log);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uri_log.uris.lock().unwrap().push(request.uri().to_string());
        Ok(response)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    log.connections.fetch_add(1, Ordering::SeqCst);

    let (mut tx, mut rx) = ws.split();
    for reply in options.replies {
        if tx.send(Message::Binary(reply)).await.is_err() {
            return;
        }
    }

    let mut received = 0usize;
    let mut close_seen = false;
    while let Some(message) = rx.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                log.frames.lock().unwrap().push(data);
                received += 1;
                if options.drop_after == Some(received) {
                    events.push("server_dropped");
                    return;
                }
            }
            Ok(Message::Close(_)) => {
                if !close_seen {
                    close_seen = true;
                    events.push("server_closed");
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    if !close_seen {
        events.push("server_closed");
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn target(session_id: &str, token: &str) -> SessionTarget {
    SessionTarget::new(session_id, AuthToken::new(token), SettingsContext::default())
}

/// Short timeouts so failure paths resolve quickly
pub fn session_config(endpoint: &str) -> SessionConfig {
    SessionConfig {
        transport: TransportConfig {
            endpoint: endpoint.to_string(),
            connect_timeout: Duration::from_secs(2),
            close_timeout: Duration::from_millis(500),
            inbound_capacity: 16,
        },
        capture: CaptureConfig {
            chunk_duration: Duration::from_millis(10),
            queue_capacity: 16,
        },
        playback: PlaybackConfig { queue_capacity: 16 },
        stop_step_timeout: Duration::from_secs(1),
    }
}

/// An endpoint nothing is listening on
pub async fn unused_endpoint() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("ws://{}/ws/voice", addr))
}

/// Poll `condition` until it holds, failing after `limit`
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Run `future`, failing the test if it does not finish within `limit`
pub async fn within<T>(limit: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(limit, future)
        .await
        .expect("operation timed out")
}

/// Write a mono 16kHz WAV with `samples` ascending samples
pub fn write_wav(path: &Path, samples: usize) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for i in 0..samples {
        writer.write_sample((i % 1000) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
