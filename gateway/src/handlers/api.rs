//! Health check and session registry endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::state::{AppState, SessionInfo};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
}

/// `GET /`
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        sessions: state.sessions.len(),
    })
}

/// `GET /sessions`
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list())
}

/// `DELETE /sessions/{client_id}`
///
/// Closes the session with the full handshake and unregisters it.
pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    let Some(entry) = state.sessions.remove(&client_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Session not found: {client_id}")})),
        );
    };

    info!(client_id = %client_id, "Closing session via API");
    entry.manager.close().await;

    (
        StatusCode::OK,
        Json(json!({"client_id": client_id, "status": "closed"})),
    )
}
