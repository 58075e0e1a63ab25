//! File-backed audio devices for the CLI chat host.

pub mod wav;

use thiserror::Error;

pub use wav::{WavCapture, WavPlayback};

#[derive(Debug, Error)]
pub enum AudioIoError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio channel closed")]
    ChannelClosed,

    #[error("Audio task failed: {0}")]
    Task(String),
}

pub type AudioIoResult<T> = Result<T, AudioIoError>;
