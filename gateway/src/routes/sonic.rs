//! Companion WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::sonic::sonic_ws_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the companion WebSocket router
///
/// # Endpoint
///
/// `GET /ws/{client_id}` - WebSocket upgrade, one Nova Sonic session per client
///
/// # Example
///
/// ```json
/// // Client streams microphone audio
/// {"type": "audio", "data": "<base64 pcm16 16kHz>"}
///
/// // Server sends transcripts, audio and status updates
/// {"type": "text", "data": "Hello!", "role": "ASSISTANT", "timestamp": "14:07:09.042", "unix_timestamp": 1709647629.042, "is_speculative": false}
/// {"type": "status", "status": "connected", "message": "Connected to Nova Sonic"}
/// ```
pub fn create_sonic_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/{client_id}", get(sonic_ws_handler))
        .layer(TraceLayer::new_for_http())
}
