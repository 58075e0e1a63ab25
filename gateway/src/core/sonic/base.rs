//! Base types shared by the Nova Sonic session components.
//!
//! Errors, reconnection policy, the values surfaced to hosts (text, audio,
//! status, latency) and the callback aliases used to deliver them.
//!
//! # Audio Format
//!
//! Input is PCM 16-bit signed little-endian mono at 16kHz. Output is the same
//! encoding at 24kHz.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while driving a Sonic session.
#[derive(Debug, Clone, Error)]
pub enum SonicError {
    /// Client-side protocol violation (content event without a matching start,
    /// double end, wrong payload kind). Rejected before transmission.
    #[error("Lifecycle violation: {0}")]
    Lifecycle(String),

    /// The session is not active; nothing was sent
    #[error("Session is not active")]
    NotActive,

    /// Send or receive failure on the duplex stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// The duplex stream could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Malformed inbound frame
    #[error("Decode error: {0}")]
    Decode(String),

    /// An event builder rejected its input
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Reconnection attempts exhausted; the session was torn down
    #[error("Session failed: {0}")]
    SessionFailed(String),
}

impl SonicError {
    /// Whether this error came from the duplex channel rather than from
    /// local validation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SonicError::Transport(_) | SonicError::ConnectionFailed(_) | SonicError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for SonicError {
    fn from(e: serde_json::Error) -> Self {
        SonicError::Serialization(e.to_string())
    }
}

/// Result type for Sonic operations.
pub type SonicResult<T> = Result<T, SonicError>;

// =============================================================================
// Reconnection
// =============================================================================

/// Configuration for automatic reconnection after a transport failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Enable automatic reconnection.
    /// Default: true
    pub enabled: bool,

    /// Maximum number of reconnection attempts before the session is failed.
    /// Set to 0 for unlimited attempts.
    /// Default: 3
    pub max_attempts: u32,

    /// Initial delay between attempts (milliseconds).
    /// Default: 500ms
    pub initial_delay_ms: u64,

    /// Maximum delay between attempts (milliseconds).
    /// Default: 8000ms
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,

    /// Whether to add jitter to the delay.
    /// Default: true
    pub jitter: bool,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectionConfig {
    /// Create a config with reconnection disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay before the given attempt (1-based), exponential with optional jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        let millis = if self.jitter {
            // up to 25% either way
            let jitter = rand::random_range(-0.25..=0.25) * delay;
            (delay + jitter).max(0.0)
        } else {
            delay
        };
        Duration::from_millis(millis as u64)
    }

    /// Check if more reconnection attempts are allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

// =============================================================================
// Host-facing values
// =============================================================================

/// Speaker role as reported by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpeakerRole {
    System,
    User,
    Assistant,
    Tool,
}

impl SpeakerRole {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerRole::System => "SYSTEM",
            SpeakerRole::User => "USER",
            SpeakerRole::Assistant => "ASSISTANT",
            SpeakerRole::Tool => "TOOL",
        }
    }
}

impl fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A text output delivered to the host after de-duplication and
/// speculative gating.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextOutput {
    /// Role that produced the text
    pub role: SpeakerRole,
    /// The text itself
    pub text: String,
    /// Whether this text came from a speculative generation stage
    pub speculative: bool,
}

/// A flushed run of assistant audio.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Raw audio bytes (PCM 16-bit, 24kHz, mono, little-endian)
    pub data: Bytes,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Session status surfaced to hosts.
///
/// Transport trouble (`StreamClosed`, `Reconnecting`, `Failed`) is always
/// distinguishable from normal completion (`Completed`) and from a local
/// close (`Closed`).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    /// Stream opened and initialized
    Connected,
    /// The transport ended or failed unexpectedly
    StreamClosed { reason: String },
    /// A reconnect attempt is about to run
    Reconnecting { attempt: u32 },
    /// A reconnect attempt succeeded
    Reconnected { attempt: u32 },
    /// Retries exhausted, the session is torn down
    Failed { reason: String },
    /// The model sent `completionEnd`
    Completed,
    /// The session was closed locally
    Closed,
    /// Voice change started
    ChangingVoice { voice: String },
    /// Voice change finished
    VoiceChanged { voice: String },
    /// Buffered assistant audio was discarded after an interruption
    BargeIn,
}

impl SessionStatus {
    /// Short machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            SessionStatus::Connected => "connected",
            SessionStatus::StreamClosed { .. } => "stream_closed",
            SessionStatus::Reconnecting { .. } => "reconnecting",
            SessionStatus::Reconnected { .. } => "reconnected",
            SessionStatus::Failed { .. } => "failed",
            SessionStatus::Completed => "completed",
            SessionStatus::Closed => "closed",
            SessionStatus::ChangingVoice { .. } => "changing_voice",
            SessionStatus::VoiceChanged { .. } => "voice_changed",
            SessionStatus::BargeIn => "barge_in_handled",
        }
    }

    /// Whether the session can no longer carry audio.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Failed { .. } | SessionStatus::Completed | SessionStatus::Closed
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Connected => write!(f, "Connected to Nova Sonic"),
            SessionStatus::StreamClosed { reason } => write!(f, "Stream closed: {reason}"),
            SessionStatus::Reconnecting { attempt } => {
                write!(f, "Reconnecting (attempt {attempt})")
            }
            SessionStatus::Reconnected { attempt } => {
                write!(f, "Reconnected after {attempt} attempt(s)")
            }
            SessionStatus::Failed { reason } => write!(f, "Session failed: {reason}"),
            SessionStatus::Completed => write!(f, "Completion ended"),
            SessionStatus::Closed => write!(f, "Session closed"),
            SessionStatus::ChangingVoice { voice } => write!(f, "Changing voice to {voice}"),
            SessionStatus::VoiceChanged { voice } => write!(f, "Voice changed to {voice}"),
            SessionStatus::BargeIn => write!(f, "Barge-in handled"),
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback type for text output.
pub type TextCallback =
    Arc<dyn Fn(TextOutput) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for flushed assistant audio.
pub type AudioCallback =
    Arc<dyn Fn(AudioChunk) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for status changes.
pub type StatusCallback =
    Arc<dyn Fn(SessionStatus) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for response latency (user speech end to first assistant audio).
pub type LatencyCallback =
    Arc<dyn Fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for session errors.
pub type SonicErrorCallback =
    Arc<dyn Fn(SonicError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Registered host callbacks for one session.
///
/// Shared between the manager and its tasks; registration after the session
/// starts is picked up by the next delivery.
#[derive(Default, Clone)]
pub struct SessionCallbacks {
    pub text: Option<TextCallback>,
    pub audio: Option<AudioCallback>,
    pub status: Option<StatusCallback>,
    pub latency: Option<LatencyCallback>,
    pub error: Option<SonicErrorCallback>,
}

/// Shared handle to the callbacks of a session.
pub type SharedCallbacks = Arc<parking_lot::RwLock<SessionCallbacks>>;

/// Deliver a status to the registered status callback, if any.
pub(crate) async fn emit_status(callbacks: &SharedCallbacks, status: SessionStatus) {
    let cb = callbacks.read().status.clone();
    if let Some(cb) = cb {
        cb(status).await;
    }
}

/// Deliver an error to the registered error callback, if any.
pub(crate) async fn emit_error(callbacks: &SharedCallbacks, error: SonicError) {
    let cb = callbacks.read().error.clone();
    if let Some(cb) = cb {
        cb(error).await;
    }
}
