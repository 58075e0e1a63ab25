//! Amazon Nova Sonic bidirectional speech sessions.
//!
//! # Components
//!
//! - [`events`]: typed input event builders and output event parsing
//! - [`lifecycle`]: client-side content lifecycle validation
//! - [`sender`]: outbound event transmission
//! - [`transport`] / [`bedrock`]: the duplex stream seam and its Bedrock implementation
//! - [`processor`]: inbound event handling, tool use and reconnection
//! - [`audio_buffer`]: assistant audio buffering and barge-in
//! - [`manager`]: the [`StreamManager`] hosts drive
//!
//! # Audio Format
//!
//! - Input: PCM 16-bit, 16kHz, mono, base64 on the wire
//! - Output: PCM 16-bit, 24kHz, mono, base64 on the wire

pub mod audio_buffer;
mod base;
pub mod bedrock;
mod config;
pub mod dedup;
pub mod events;
pub mod latency;
pub mod lifecycle;
mod manager;
pub mod processor;
pub mod sender;
mod session;
pub mod transport;

pub use base::{
    AudioCallback, AudioChunk, LatencyCallback, ReconnectionConfig, SessionCallbacks,
    SessionStatus, SharedCallbacks, SonicError, SonicErrorCallback, SonicResult, SpeakerRole,
    StatusCallback, TextCallback, TextOutput,
};
pub use bedrock::{AwsCredentials, BedrockConnector};
pub use config::{
    DEFAULT_MODEL_ID, DEFAULT_REGION, DEFAULT_SYSTEM_PROMPT, INPUT_CHUNK_FRAMES,
    INPUT_SAMPLE_RATE, InferenceParams, OUTPUT_SAMPLE_RATE, SonicConfig, SonicVoice,
};
pub use events::{ContentType, InputEvent, OutputEvent};
pub use manager::StreamManager;
pub use processor::ToolState;
pub use transport::{ChannelSink, ChannelStream, EventSink, EventStream, TransportConnector};
