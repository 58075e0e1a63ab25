use axum::{
    Router,
    routing::{delete, get},
};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router
///
/// - `GET /` - health check
/// - `GET /sessions` - registered sessions
/// - `DELETE /sessions/{client_id}` - close and unregister a session
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/sessions", get(api::list_sessions))
        .route("/sessions/{client_id}", delete(api::close_session))
        .layer(TraceLayer::new_for_http())
}
