use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::target::SessionTarget;
use crate::audio::{AudioChunk, Sequencer};
use crate::error::{SessionError, SessionResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound audio, in receipt order
///
/// A fault on the connection is delivered as a final `Err` item. A locally
/// initiated close just ends the stream.
pub type InboundFrames = mpsc::Receiver<SessionResult<AudioChunk>>;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Configuration for the voice service connection
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Websocket endpoint; session fields are appended as query parameters
    pub endpoint: String,
    /// Upper bound on TCP connect + websocket handshake
    pub connect_timeout: Duration,
    /// Upper bound on the close handshake
    pub close_timeout: Duration,
    /// Inbound frames buffered ahead of playback
    pub inbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8787/ws/voice".to_string(),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
            inbound_capacity: 64,
        }
    }
}

/// Duplex binary connection for one session
///
/// `send` and `close` take `&mut self`, so they can never run concurrently.
pub struct TransportChannel {
    session_id: String,
    close_timeout: Duration,
    state: Arc<watch::Sender<ChannelState>>,
    sink: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
    inbound: Option<InboundFrames>,
    frames_sent: u64,
}

impl TransportChannel {
    /// Open the connection for `target`
    pub async fn connect(config: &TransportConfig, target: &SessionTarget) -> SessionResult<Self> {
        let (state, _) = watch::channel(ChannelState::Connecting);
        let state = Arc::new(state);

        info!(
            "Connecting to voice service at {}",
            target.redacted_url(&config.endpoint)
        );

        let url = target.connect_url(&config.endpoint)?;
        let ws = match tokio::time::timeout(config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                state.send_replace(ChannelState::Closed);
                return Err(SessionError::ConnectFailed(e.to_string()));
            }
            Err(_) => {
                state.send_replace(ChannelState::Closed);
                return Err(SessionError::ConnectFailed(format!(
                    "timed out after {}ms",
                    config.connect_timeout.as_millis()
                )));
            }
        };

        let (sink, stream) = ws.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));

        state.send_replace(ChannelState::Open);
        let reader = tokio::spawn(read_inbound(
            stream,
            inbound_tx,
            Arc::clone(&state),
            target.session_id.clone(),
        ));

        info!("Connected to voice service (session {})", target.session_id);

        Ok(Self {
            session_id: target.session_id.clone(),
            close_timeout: config.close_timeout,
            state,
            sink: Some(sink),
            reader: Some(reader),
            inbound: Some(inbound_rx),
            frames_sent: 0,
        })
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch lifecycle changes, including remote closure
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Take the inbound frame receiver (available once)
    pub fn take_inbound(&mut self) -> Option<InboundFrames> {
        self.inbound.take()
    }

    /// Send one chunk as a single binary message
    pub async fn send(&mut self, chunk: &AudioChunk) -> SessionResult<()> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(SessionError::SendFailed(format!(
                "connection is {:?}",
                state
            )));
        }

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| SessionError::SendFailed("connection already released".to_string()))?;

        if let Err(e) = sink.send(Message::Binary(chunk.data().to_vec())).await {
            // Open → Closed directly on error
            self.state.send_replace(ChannelState::Closed);
            return Err(SessionError::SendFailed(e.to_string()));
        }

        self.frames_sent += 1;
        debug!(
            "Sent frame {} ({} bytes) for session {}",
            chunk.sequence(),
            chunk.len(),
            self.session_id
        );

        Ok(())
    }

    /// Close the connection and release the socket
    ///
    /// Idempotent. After a remote close or error only local resources are
    /// released; no second close handshake is attempted.
    pub async fn close(&mut self) {
        if self.sink.is_none() && self.reader.is_none() {
            debug!("Connection for session {} already closed", self.session_id);
            return;
        }

        if self.state() == ChannelState::Open {
            self.state.send_replace(ChannelState::Closing);

            if let Some(sink) = self.sink.as_mut() {
                match tokio::time::timeout(self.close_timeout, sink.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Close handshake failed for session {}: {}", self.session_id, e),
                    Err(_) => warn!("Close handshake timed out for session {}", self.session_id),
                }
            }

            // Give the reader a chance to observe the server's close reply
            if let Some(reader) = self.reader.as_mut() {
                if tokio::time::timeout(self.close_timeout, reader).await.is_err() {
                    debug!("Reader for session {} still running after close", self.session_id);
                }
            }
        }

        self.sink = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.state.send_replace(ChannelState::Closed);

        info!(
            "Connection closed for session {} ({} frames sent)",
            self.session_id, self.frames_sent
        );
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Forward inbound binary messages until the connection ends
async fn read_inbound(
    mut stream: SplitStream<WsStream>,
    inbound_tx: mpsc::Sender<SessionResult<AudioChunk>>,
    state: Arc<watch::Sender<ChannelState>>,
    session_id: String,
) {
    let mut sequencer = Sequencer::new();

    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                let chunk = sequencer.stamp(data);
                debug!(
                    "Received frame {} ({} bytes) for session {}",
                    chunk.sequence(),
                    chunk.len(),
                    session_id
                );
                if inbound_tx.send(Ok(chunk)).await.is_err() {
                    // Consumer gone, nothing left to deliver to
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => format!("closed by server ({}: {})", frame.code, frame.reason),
                    None => "closed by server".to_string(),
                };
            }
            Some(Ok(Message::Text(text))) => {
                debug!("Ignoring text message for session {}: {}", session_id, text);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break e.to_string(),
            None => break "connection ended".to_string(),
        }
    };

    // A close we initiated ourselves is not a fault
    let remote = state.send_if_modified(|current| {
        if *current == ChannelState::Open {
            *current = ChannelState::Closed;
            true
        } else {
            false
        }
    });

    info!(
        "Inbound stream for session {} ended after {} frames: {}",
        session_id,
        sequencer.issued(),
        reason
    );

    if remote {
        let _ = inbound_tx
            .send(Err(SessionError::StreamTerminated(reason)))
            .await;
    }
}
