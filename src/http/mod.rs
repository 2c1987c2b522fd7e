//! HTTP API server for external control (UI shell)
//!
//! This module provides a REST API for controlling voice sessions:
//! - POST /sessions/start - Start a session
//! - POST /sessions/stop/:id - Stop a session
//! - GET /sessions/:id/status - Query connectivity, last error and stats
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, DeviceProfile};
