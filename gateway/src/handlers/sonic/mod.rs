//! Companion WebSocket handlers
//!
//! One Nova Sonic session per connection on `/ws/{client_id}`.
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **audio**: `{"type":"audio","data":<base64 pcm16 16kHz>}`
//! - **barge_in**: discard buffered assistant audio
//! - **voice_change**: `{"type":"voice_change","voice":"matthew|tiffany|amy"}`
//! - **text**: a typed user turn
//! - **end**: close the session
//! - **Binary frames**: raw PCM 16-bit, 16kHz, mono
//!
//! ## Server → Client
//!
//! - **text**: transcript or assistant text with timestamps
//! - **audio**: base64 PCM 16-bit, 24kHz, mono
//! - **latency**: seconds from end of user speech to first assistant audio
//! - **status**: session status changes
//! - **error**: error reports

mod handler;
pub mod messages;

pub use handler::sonic_ws_handler;
