//! Nova Sonic session configuration.
//!
//! - Model and region selection
//! - Voice selection and persona prompts
//! - Inference parameters
//! - Buffering, de-duplication and pacing knobs

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::base::{ReconnectionConfig, SonicError, SonicResult};

/// Default Nova Sonic model identifier.
pub const DEFAULT_MODEL_ID: &str = "amazon.nova-sonic-v1:0";

/// Default AWS region for Bedrock.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Sample rate of audio sent to the model.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of audio produced by the model.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Frames per captured input chunk (32ms at 16kHz).
pub const INPUT_CHUNK_FRAMES: usize = 1024;

/// System prompt for the tool-use assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friend. The user and you will engage in a spoken dialog \
exchanging the transcripts of a natural real-time conversation. \
When reading order numbers, please read each digit individually, separated by pauses. \
For example, order #1234 should be read as 'order number one-two-three-four' \
rather than 'order number one thousand two hundred thirty-four'.";

const TIFFANY_PERSONA: &str = "You are Tiffany, a warm and nurturing emotional companion with a compassionate and gentle demeanor. \
Your communication style is empathetic and intuitive, with nurturing language that provides comfort, \
gentle encouragement and validation of feelings, and thoughtful questions that explore emotional nuances. \
Your primary goal is to create a supportive, safe space where the user feels truly heard and understood. \
Adapt your tone to match the user's emotional state. \
Keep your responses concise and engaging, generally two or three sentences. \
If the user seems distressed, prioritize empathy and validation over problem-solving.";

const MATTHEW_PERSONA: &str = "You are Matthew, a supportive and steady emotional companion with a calm and reassuring presence. \
Your communication style is steady and grounding, straightforward yet compassionate, \
balancing practical reassurance with emotional understanding. \
Your primary goal is to create a dependable, supportive presence where the user feels anchored and understood. \
Adapt your approach based on the user's needs, offering more direct support during challenging times. \
Keep your responses concise and engaging, generally two or three sentences. \
If the user seems distressed, balance practical perspective with emotional validation.";

const AMY_PERSONA: &str = "You are Amy, a cheerful and curious companion. \
You listen closely, ask light follow-up questions and keep the conversation flowing naturally. \
Keep your responses concise and engaging, generally two or three sentences.";

// =============================================================================
// Voices
// =============================================================================

/// Output voices offered by Nova Sonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SonicVoice {
    /// Matthew (default)
    #[default]
    Matthew,
    /// Tiffany
    Tiffany,
    /// Amy
    Amy,
}

impl SonicVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matthew => "matthew",
            Self::Tiffany => "tiffany",
            Self::Amy => "amy",
        }
    }

    /// Strict parse, used for voice-change requests.
    pub fn parse(s: &str) -> SonicResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "matthew" => Ok(Self::Matthew),
            "tiffany" => Ok(Self::Tiffany),
            "amy" => Ok(Self::Amy),
            other => Err(SonicError::InvalidConfiguration(format!(
                "Unsupported voice: {other}. Supported: {:?}",
                Self::all().iter().map(|v| v.as_str()).collect::<Vec<_>>()
            ))),
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// All supported voices.
    pub fn all() -> &'static [SonicVoice] {
        &[Self::Matthew, Self::Tiffany, Self::Amy]
    }

    /// Companion persona prompt matching this voice.
    pub fn persona_prompt(&self) -> &'static str {
        match self {
            Self::Matthew => MATTHEW_PERSONA,
            Self::Tiffany => TIFFANY_PERSONA,
            Self::Amy => AMY_PERSONA,
        }
    }
}

impl std::fmt::Display for SonicVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Inference
// =============================================================================

/// Inference parameters sent in `sessionStart`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            top_p: 0.9,
            temperature: 0.7,
        }
    }
}

// =============================================================================
// Session Config
// =============================================================================

/// Per-session settings for a [`StreamManager`](super::StreamManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SonicConfig {
    /// Bedrock model id
    pub model_id: String,
    /// AWS region
    pub region: String,
    /// Output voice
    pub voice: SonicVoice,
    /// System prompt; `None` uses [`DEFAULT_SYSTEM_PROMPT`]
    pub system_prompt: Option<String>,
    /// Inference parameters
    pub inference: InferenceParams,
    /// Surface speculative assistant drafts instead of suppressing them
    pub show_speculative: bool,
    /// Window in which an identical (role, text) pair is suppressed
    pub dedup_cooldown_ms: u64,
    /// Audio output flush threshold in bytes
    pub audio_buffer_threshold: usize,
    /// Audio output idle flush interval
    pub audio_poll_interval_ms: u64,
    /// Consecutive malformed frames tolerated before a reconnect
    pub max_consecutive_decode_failures: u32,
    /// Pause between initialization events
    pub init_event_delay_ms: u64,
    /// Pauses after contentEnd, promptEnd and sessionEnd during close
    pub close_event_delays_ms: [u64; 3],
    /// Continuous input silence that marks the end of user speech
    pub silence_threshold_ms: u64,
    /// Peak sample amplitude under which an input chunk counts as silence
    pub silence_peak: u16,
    /// Reconnection policy
    pub reconnection: ReconnectionConfig,
}

impl Default for SonicConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            region: DEFAULT_REGION.to_string(),
            voice: SonicVoice::default(),
            system_prompt: None,
            inference: InferenceParams::default(),
            show_speculative: false,
            dedup_cooldown_ms: 2000,
            audio_buffer_threshold: 4096,
            audio_poll_interval_ms: 50,
            max_consecutive_decode_failures: 3,
            init_event_delay_ms: 100,
            close_event_delays_ms: [100, 100, 200],
            silence_threshold_ms: 500,
            silence_peak: 500,
            reconnection: ReconnectionConfig::default(),
        }
    }
}

impl SonicConfig {
    /// The system prompt that will be sent at initialization.
    pub fn effective_system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn dedup_cooldown(&self) -> Duration {
        Duration::from_millis(self.dedup_cooldown_ms)
    }

    pub fn audio_poll_interval(&self) -> Duration {
        Duration::from_millis(self.audio_poll_interval_ms)
    }

    pub fn init_event_delay(&self) -> Duration {
        Duration::from_millis(self.init_event_delay_ms)
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    /// Settings for tests and tools that should not sleep between events.
    pub fn without_pacing(mut self) -> Self {
        self.init_event_delay_ms = 0;
        self.close_event_delays_ms = [0, 0, 0];
        self
    }

    /// Check the settings before a session is started.
    pub fn validate(&self) -> SonicResult<()> {
        if self.model_id.trim().is_empty() {
            return Err(SonicError::InvalidConfiguration(
                "model_id must not be empty".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(SonicError::InvalidConfiguration(
                "region must not be empty".to_string(),
            ));
        }
        if self.audio_buffer_threshold == 0 {
            return Err(SonicError::InvalidConfiguration(
                "audio_buffer_threshold must be greater than zero".to_string(),
            ));
        }
        if self.audio_poll_interval_ms == 0 {
            return Err(SonicError::InvalidConfiguration(
                "audio_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.inference.max_tokens == 0 {
            return Err(SonicError::InvalidConfiguration(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.inference.top_p) {
            return Err(SonicError::InvalidConfiguration(format!(
                "top_p must be within 0.0..=1.0, got {}",
                self.inference.top_p
            )));
        }
        if !(0.0..=1.0).contains(&self.inference.temperature) {
            return Err(SonicError::InvalidConfiguration(format!(
                "temperature must be within 0.0..=1.0, got {}",
                self.inference.temperature
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_parsing() {
        assert_eq!(SonicVoice::parse("Tiffany").unwrap(), SonicVoice::Tiffany);
        assert_eq!(SonicVoice::parse(" amy ").unwrap(), SonicVoice::Amy);
        assert!(SonicVoice::parse("alloy").is_err());
        assert_eq!(SonicVoice::from_str_or_default("alloy"), SonicVoice::Matthew);
    }

    #[test]
    fn test_persona_prompts_are_distinct() {
        assert!(SonicVoice::Tiffany.persona_prompt().starts_with("You are Tiffany"));
        assert!(SonicVoice::Matthew.persona_prompt().starts_with("You are Matthew"));
        assert_ne!(
            SonicVoice::Tiffany.persona_prompt(),
            SonicVoice::Amy.persona_prompt()
        );
    }

    #[test]
    fn test_default_config() {
        let config = SonicConfig::default();
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.audio_buffer_threshold, 4096);
        assert_eq!(config.audio_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.dedup_cooldown(), Duration::from_secs(2));
        assert!(config.effective_system_prompt().starts_with("You are a friend"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = SonicConfig {
            audio_buffer_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SonicError::InvalidConfiguration(_))
        ));

        let mut config = SonicConfig::default();
        config.inference.top_p = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SonicConfig =
            serde_json::from_str(r#"{"voice": "tiffany", "show_speculative": true}"#).unwrap();
        assert_eq!(config.voice, SonicVoice::Tiffany);
        assert!(config.show_speculative);
        assert_eq!(config.dedup_cooldown_ms, 2000);
    }
}
