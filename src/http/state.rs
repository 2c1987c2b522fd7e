use crate::audio::{CaptureSource, LeaseRegistry, PlaybackTarget};
use crate::session::{SessionConfig, SessionController};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Device setup used for every session started over HTTP
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub capture: CaptureSource,
    pub playback: PlaybackTarget,
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Live voice sessions (session_id → controller)
    pub sessions: Arc<RwLock<HashMap<String, Arc<SessionController>>>>,

    /// Runtime configuration applied to new sessions
    pub session_config: SessionConfig,

    pub devices: DeviceProfile,

    /// Keeps concurrent sessions off each other's devices
    pub leases: LeaseRegistry,
}

impl AppState {
    pub fn new(session_config: SessionConfig, devices: DeviceProfile) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            session_config,
            devices,
            leases: LeaseRegistry::new(),
        }
    }

    /// Stop every live session (used on shutdown)
    pub async fn stop_all(&self) {
        let sessions: Vec<_> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };

        for session in sessions {
            session.stop().await;
        }
    }
}
