use super::state::AppState;
use crate::audio::AudioBackendFactory;
use crate::error::{ErrorKind, SessionError};
use crate::session::{
    SessionController, SessionDevices, SessionStats, SessionStatus, SettingsContext,
};
use crate::transport::{AuthToken, SessionTarget};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,

    /// Bearer token for the voice service
    pub token: AuthToken,

    /// Session preferences (defaults when omitted)
    #[serde(default)]
    pub settings: SettingsContext,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub session_id: String,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub status: SessionStatus,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: Option<ErrorKind>,
}

fn error_response(status: StatusCode, error: String, kind: Option<ErrorKind>) -> Response {
    (status, Json(ErrorResponse { error, kind })).into_response()
}

fn status_for(error: &SessionError) -> StatusCode {
    match error {
        SessionError::PermissionDenied => StatusCode::FORBIDDEN,
        SessionError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::ConnectFailed(_) => StatusCode::BAD_GATEWAY,
        SessionError::SessionClosed => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions/start
/// Start a new voice session
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Response {
    if req.token.is_empty() {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Not authenticated".to_string(),
            None,
        );
    }

    // Generate or use provided session ID
    let session_id = req
        .session_id
        .unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4()));

    info!("Starting voice session: {}", session_id);

    let capture = match AudioBackendFactory::create_capture(&state.devices.capture) {
        Ok(capture) => capture,
        Err(e) => {
            error!("Failed to create capture backend: {:#}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create capture backend: {:#}", e),
                None,
            );
        }
    };

    let playback = match AudioBackendFactory::create_playback(&state.devices.playback, &session_id)
    {
        Ok(playback) => playback,
        Err(e) => {
            error!("Failed to create playback backend: {:#}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create playback backend: {:#}", e),
                None,
            );
        }
    };

    let controller = Arc::new(SessionController::new(
        SessionTarget::new(session_id.clone(), req.token, req.settings),
        SessionDevices {
            capture,
            playback,
            leases: state.leases.clone(),
        },
        state.session_config.clone(),
    ));

    // Reserve the ID before starting so concurrent requests cannot both win
    {
        let mut sessions = state.sessions.write().await;
        if let Some(existing) = sessions.get(&session_id) {
            if !existing.state().is_terminal() {
                return error_response(
                    StatusCode::CONFLICT,
                    format!("Session {} is already live", session_id),
                    None,
                );
            }
        }
        sessions.insert(session_id.clone(), Arc::clone(&controller));
    }

    if let Err(e) = controller.start().await {
        error!("Failed to start session {}: {}", session_id, e);

        let mut sessions = state.sessions.write().await;
        if sessions
            .get(&session_id)
            .is_some_and(|current| Arc::ptr_eq(current, &controller))
        {
            sessions.remove(&session_id);
        }

        return error_response(status_for(&e), e.to_string(), Some(e.kind()));
    }

    info!("Voice session started: {}", session_id);

    (
        StatusCode::OK,
        Json(StartSessionResponse {
            session_id: session_id.clone(),
            status: controller.status(),
            message: format!("Session {} is live", session_id),
        }),
    )
        .into_response()
}

/// POST /sessions/stop/:session_id
/// Stop a voice session and release its devices
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    info!("Stopping voice session: {}", session_id);

    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id)
    };

    match session {
        Some(session) => {
            let stats = session.stop().await;
            info!("Voice session stopped: {}", session_id);
            (
                StatusCode::OK,
                Json(StopSessionResponse {
                    session_id,
                    message: "Session stopped".to_string(),
                    stats,
                }),
            )
                .into_response()
        }
        None => {
            warn!("Session {} not found", session_id);
            error_response(
                StatusCode::NOT_FOUND,
                format!("Session {} not found", session_id),
                None,
            )
        }
    }
}

/// GET /sessions/:session_id/status
/// Get connectivity, last error and statistics of a session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => (
            StatusCode::OK,
            Json(SessionStatusResponse {
                status: session.status(),
                stats: session.stats(),
            }),
        )
            .into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
            None,
        ),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
