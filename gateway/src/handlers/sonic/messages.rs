//! Companion WebSocket message types
//!
//! JSON messages exchanged with browser clients on `/ws/{client_id}`.
//! Audio travels base64-encoded inside JSON in both directions.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::sonic::{SessionStatus, TextOutput};

/// Maximum allowed size for a base64 audio payload (1 MB)
pub const MAX_AUDIO_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Maximum allowed size for text messages (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Incoming WebSocket messages from the client
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SonicIncomingMessage {
    /// Microphone audio, base64 PCM 16-bit 16kHz mono
    Audio { data: String },

    /// The user started talking over playback
    BargeIn,

    /// Switch the assistant voice
    VoiceChange { voice: String },

    /// A typed user turn
    Text { text: String },

    /// End the session
    End,
}

impl SonicIncomingMessage {
    /// Reject oversized payloads before they are decoded or forwarded.
    pub fn validate_size(&self) -> Result<(), String> {
        match self {
            Self::Audio { data } if data.len() > MAX_AUDIO_PAYLOAD_SIZE => Err(format!(
                "Audio payload too large: {} bytes (max {})",
                data.len(),
                MAX_AUDIO_PAYLOAD_SIZE
            )),
            Self::Text { text } if text.len() > MAX_TEXT_SIZE => Err(format!(
                "Text too large: {} bytes (max {})",
                text.len(),
                MAX_TEXT_SIZE
            )),
            _ => Ok(()),
        }
    }
}

/// Decode a base64 audio payload.
pub fn decode_audio(data: &str) -> Result<Bytes, String> {
    BASE64
        .decode(data.trim())
        .map(Bytes::from)
        .map_err(|e| format!("Invalid base64 audio: {e}"))
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Outgoing WebSocket messages to the client
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SonicOutgoingMessage {
    /// Transcript or assistant text
    Text {
        data: String,
        role: String,
        /// Local wall-clock time, `HH:MM:SS.mmm`
        timestamp: String,
        unix_timestamp: f64,
        is_speculative: bool,
    },

    /// Assistant audio, base64 PCM 16-bit 24kHz mono
    Audio { data: String },

    /// Response latency in seconds, rounded to milliseconds
    Latency { data: f64 },

    /// Session status change
    Status { status: String, message: String },

    /// Error report
    Error { code: String, message: String },
}

impl SonicOutgoingMessage {
    pub fn text(output: &TextOutput) -> Self {
        Self::text_at(output, Local::now())
    }

    pub fn text_at<Tz: TimeZone>(output: &TextOutput, now: DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self::Text {
            data: output.text.clone(),
            role: output.role.as_str().to_string(),
            timestamp: now.format("%H:%M:%S%.3f").to_string(),
            unix_timestamp: now.timestamp_millis() as f64 / 1000.0,
            is_speculative: output.speculative,
        }
    }

    pub fn audio(data: &[u8]) -> Self {
        Self::Audio {
            data: BASE64.encode(data),
        }
    }

    pub fn latency(latency: Duration) -> Self {
        Self::Latency {
            data: (latency.as_secs_f64() * 1000.0).round() / 1000.0,
        }
    }

    pub fn status(status: &SessionStatus) -> Self {
        Self::Status {
            status: status.code().to_string(),
            message: status.to_string(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Routing for the connection's sender task
#[derive(Debug)]
pub enum SonicMessageRoute {
    Outgoing(SonicOutgoingMessage),
    Close,
}
