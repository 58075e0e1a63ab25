//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and session registry endpoints
//! - `sonic` - Companion WebSocket running one Nova Sonic session per client

pub mod api;
pub mod sonic;

pub use sonic::sonic_ws_handler;
