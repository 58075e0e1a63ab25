//! Nova Sonic event types.
//!
//! Input events are built through validating constructors on [`InputEvent`]
//! and serialize to the exact wire shape `{"event": {"<kind>": {...}}}`:
//!
//! - `sessionStart`, `promptStart`, `contentStart` (AUDIO/TEXT/TOOL)
//! - `textInput`, `audioInput`, `toolResult`
//! - `contentEnd`, `promptEnd`, `sessionEnd`
//!
//! Output frames are classified by [`OutputEvent::parse`]:
//!
//! - `contentStart`, `textOutput`, `audioOutput`, `toolUse`, `contentEnd`
//! - `completionStart`, `completionEnd`, `usageEvent`

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::base::{SonicError, SonicResult, SpeakerRole};
use super::config::{INPUT_SAMPLE_RATE, InferenceParams, OUTPUT_SAMPLE_RATE, SonicVoice};
use crate::core::tools::ToolSpec;

const TEXT_MEDIA_TYPE: &str = "text/plain";
const AUDIO_MEDIA_TYPE: &str = "audio/lpcm";
const TOOL_USE_MEDIA_TYPE: &str = "application/json";

// =============================================================================
// Shared wire types
// =============================================================================

/// Content block modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Audio,
    Text,
    Tool,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Audio => "AUDIO",
            ContentType::Text => "TEXT",
            ContentType::Tool => "TOOL",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTypeConfiguration {
    pub media_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfiguration {
    pub media_type: &'static str,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u16,
    pub channel_count: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<&'static str>,
    pub encoding: &'static str,
    pub audio_type: &'static str,
}

impl AudioConfiguration {
    fn input() -> Self {
        Self {
            media_type: AUDIO_MEDIA_TYPE,
            sample_rate_hertz: INPUT_SAMPLE_RATE,
            sample_size_bits: 16,
            channel_count: 1,
            voice_id: None,
            encoding: "base64",
            audio_type: "SPEECH",
        }
    }

    fn output(voice: SonicVoice) -> Self {
        Self {
            sample_rate_hertz: OUTPUT_SAMPLE_RATE,
            voice_id: Some(voice.as_str()),
            ..Self::input()
        }
    }
}

// =============================================================================
// Input event payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub inference_configuration: InferenceConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: WireInputSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireInputSchema {
    /// The JSON schema, serialized to a string
    pub json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTool {
    pub tool_spec: WireToolSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolConfiguration {
    pub tools: Vec<WireTool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStart {
    pub prompt_name: String,
    pub text_output_configuration: MediaTypeConfiguration,
    pub audio_output_configuration: AudioConfiguration,
    pub tool_use_output_configuration: MediaTypeConfiguration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_configuration: Option<ToolConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultInputConfiguration {
    pub tool_use_id: String,
    #[serde(rename = "type")]
    pub result_type: &'static str,
    pub text_input_configuration: MediaTypeConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStart {
    pub prompt_name: String,
    pub content_name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub interactive: bool,
    pub role: SpeakerRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_configuration: Option<AudioConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_input_configuration: Option<MediaTypeConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result_input_configuration: Option<ToolResultInputConfiguration>,
}

/// Payload shared by `textInput`, `audioInput` and `toolResult`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentInput {
    pub prompt_name: String,
    pub content_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEnd {
    pub prompt_name: String,
    pub content_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptEnd {
    pub prompt_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEnd {}

// =============================================================================
// Input events
// =============================================================================

/// An event sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InputEvent {
    SessionStart(SessionStart),
    PromptStart(PromptStart),
    ContentStart(ContentStart),
    TextInput(ContentInput),
    AudioInput(ContentInput),
    ToolResult(ContentInput),
    ContentEnd(ContentEnd),
    PromptEnd(PromptEnd),
    SessionEnd(SessionEnd),
}

#[derive(Serialize)]
struct Envelope<'a> {
    event: &'a InputEvent,
}

fn require(field: &str, value: &str) -> SonicResult<()> {
    if value.trim().is_empty() {
        return Err(SonicError::InvalidEvent(format!("{field} must not be empty")));
    }
    Ok(())
}

impl InputEvent {
    /// `sessionStart` with the given inference parameters.
    pub fn session_start(params: &InferenceParams) -> SonicResult<Self> {
        if params.max_tokens == 0 {
            return Err(SonicError::InvalidEvent(
                "maxTokens must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&params.top_p) || !(0.0..=1.0).contains(&params.temperature) {
            return Err(SonicError::InvalidEvent(
                "topP and temperature must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(Self::SessionStart(SessionStart {
            inference_configuration: InferenceConfiguration {
                max_tokens: params.max_tokens,
                top_p: params.top_p,
                temperature: params.temperature,
            },
        }))
    }

    /// `promptStart` declaring output formats, the voice and the offered tools.
    pub fn prompt_start(prompt_name: &str, voice: SonicVoice, tools: &[ToolSpec]) -> SonicResult<Self> {
        require("promptName", prompt_name)?;

        let tools = tools
            .iter()
            .map(|spec| {
                require("tool name", &spec.name)?;
                Ok(WireTool {
                    tool_spec: WireToolSpec {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        input_schema: WireInputSchema {
                            json: serde_json::to_string(&spec.input_schema)?,
                        },
                    },
                })
            })
            .collect::<SonicResult<Vec<_>>>()?;

        Ok(Self::PromptStart(PromptStart {
            prompt_name: prompt_name.to_string(),
            text_output_configuration: MediaTypeConfiguration {
                media_type: TEXT_MEDIA_TYPE,
            },
            audio_output_configuration: AudioConfiguration::output(voice),
            tool_use_output_configuration: MediaTypeConfiguration {
                media_type: TOOL_USE_MEDIA_TYPE,
            },
            tool_configuration: (!tools.is_empty()).then_some(ToolConfiguration { tools }),
        }))
    }

    /// Interactive TEXT `contentStart` for the given role.
    pub fn text_content_start(
        prompt_name: &str,
        content_name: &str,
        role: SpeakerRole,
    ) -> SonicResult<Self> {
        require("promptName", prompt_name)?;
        require("contentName", content_name)?;
        Ok(Self::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Text,
            interactive: true,
            role,
            audio_input_configuration: None,
            text_input_configuration: Some(MediaTypeConfiguration {
                media_type: TEXT_MEDIA_TYPE,
            }),
            tool_result_input_configuration: None,
        }))
    }

    /// Interactive USER AUDIO `contentStart` (16kHz PCM, base64).
    pub fn audio_content_start(prompt_name: &str, content_name: &str) -> SonicResult<Self> {
        require("promptName", prompt_name)?;
        require("contentName", content_name)?;
        Ok(Self::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Audio,
            interactive: true,
            role: SpeakerRole::User,
            audio_input_configuration: Some(AudioConfiguration::input()),
            text_input_configuration: None,
            tool_result_input_configuration: None,
        }))
    }

    /// Non-interactive TOOL `contentStart` answering `tool_use_id`.
    pub fn tool_content_start(
        prompt_name: &str,
        content_name: &str,
        tool_use_id: &str,
    ) -> SonicResult<Self> {
        require("promptName", prompt_name)?;
        require("contentName", content_name)?;
        require("toolUseId", tool_use_id)?;
        Ok(Self::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Tool,
            interactive: false,
            role: SpeakerRole::Tool,
            audio_input_configuration: None,
            text_input_configuration: None,
            tool_result_input_configuration: Some(ToolResultInputConfiguration {
                tool_use_id: tool_use_id.to_string(),
                result_type: "TEXT",
                text_input_configuration: MediaTypeConfiguration {
                    media_type: TEXT_MEDIA_TYPE,
                },
            }),
        }))
    }

    /// `textInput` carrying plain text.
    pub fn text_input(prompt_name: &str, content_name: &str, text: &str) -> SonicResult<Self> {
        Ok(Self::TextInput(Self::content_input(
            prompt_name,
            content_name,
            text.to_string(),
        )?))
    }

    /// `audioInput` carrying raw PCM, base64-encoded here.
    pub fn audio_input(prompt_name: &str, content_name: &str, pcm: &[u8]) -> SonicResult<Self> {
        Ok(Self::AudioInput(Self::content_input(
            prompt_name,
            content_name,
            BASE64_STANDARD.encode(pcm),
        )?))
    }

    /// `toolResult` carrying a JSON result, serialized to a string.
    pub fn tool_result(
        prompt_name: &str,
        content_name: &str,
        result: &serde_json::Value,
    ) -> SonicResult<Self> {
        if !result.is_object() {
            return Err(SonicError::InvalidEvent(
                "tool result must be a JSON object".to_string(),
            ));
        }
        Ok(Self::ToolResult(Self::content_input(
            prompt_name,
            content_name,
            serde_json::to_string(result)?,
        )?))
    }

    pub fn content_end(prompt_name: &str, content_name: &str) -> SonicResult<Self> {
        require("promptName", prompt_name)?;
        require("contentName", content_name)?;
        Ok(Self::ContentEnd(ContentEnd {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
        }))
    }

    pub fn prompt_end(prompt_name: &str) -> SonicResult<Self> {
        require("promptName", prompt_name)?;
        Ok(Self::PromptEnd(PromptEnd {
            prompt_name: prompt_name.to_string(),
        }))
    }

    pub fn session_end() -> Self {
        Self::SessionEnd(SessionEnd {})
    }

    fn content_input(
        prompt_name: &str,
        content_name: &str,
        content: String,
    ) -> SonicResult<ContentInput> {
        require("promptName", prompt_name)?;
        require("contentName", content_name)?;
        Ok(ContentInput {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content,
        })
    }

    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStart(_) => "sessionStart",
            Self::PromptStart(_) => "promptStart",
            Self::ContentStart(_) => "contentStart",
            Self::TextInput(_) => "textInput",
            Self::AudioInput(_) => "audioInput",
            Self::ToolResult(_) => "toolResult",
            Self::ContentEnd(_) => "contentEnd",
            Self::PromptEnd(_) => "promptEnd",
            Self::SessionEnd(_) => "sessionEnd",
        }
    }

    /// Content name for content-scoped events.
    pub fn content_name(&self) -> Option<&str> {
        match self {
            Self::ContentStart(e) => Some(&e.content_name),
            Self::TextInput(e) | Self::AudioInput(e) | Self::ToolResult(e) => Some(&e.content_name),
            Self::ContentEnd(e) => Some(&e.content_name),
            _ => None,
        }
    }

    /// Serialize to the wire JSON envelope.
    pub fn to_json(&self) -> SonicResult<String> {
        Ok(serde_json::to_string(&Envelope { event: self })?)
    }
}

// =============================================================================
// Output events
// =============================================================================

/// `contentStart` from the model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStartOutput {
    #[serde(default)]
    pub role: Option<SpeakerRole>,
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
    /// JSON-encoded string, e.g. `{"generationStage":"SPECULATIVE"}`
    #[serde(default)]
    pub additional_model_fields: Option<String>,
}

impl ContentStartOutput {
    /// Generation stage carried in `additionalModelFields`: `Some(true)` for
    /// SPECULATIVE, `Some(false)` for any other stage, `None` when the block
    /// does not name one.
    pub fn is_speculative(&self) -> Option<bool> {
        self.additional_model_fields
            .as_deref()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .and_then(|fields| {
                fields
                    .get("generationStage")
                    .and_then(|stage| stage.as_str())
                    .map(|stage| stage == "SPECULATIVE")
            })
    }
}

/// `textOutput` from the model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOutputEvent {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub role: Option<SpeakerRole>,
}

impl TextOutputEvent {
    /// Whether the text is the barge-in marker `{ "interrupted" : true }`.
    pub fn is_interruption(&self) -> bool {
        let compact: String = self
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        compact.contains(r#"{"interrupted":true}"#)
    }
}

/// `audioOutput` from the model; content is base64 PCM.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputEvent {
    pub content: String,
}

impl AudioOutputEvent {
    pub fn decode(&self) -> SonicResult<Vec<u8>> {
        BASE64_STANDARD
            .decode(self.content.as_bytes())
            .map_err(|e| SonicError::Decode(format!("invalid base64 audio: {e}")))
    }
}

/// `toolUse` from the model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseEvent {
    pub tool_name: String,
    pub tool_use_id: String,
    /// Raw JSON-encoded tool input
    #[serde(default)]
    pub content: String,
}

/// `contentEnd` from the model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEndOutput {
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl ContentEndOutput {
    pub fn is_tool(&self) -> bool {
        self.content_type.as_deref() == Some(ContentType::Tool.as_str())
    }
}

/// `completionEnd` from the model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEndOutput {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// An event received from the model.
#[derive(Debug, Clone)]
pub enum OutputEvent {
    ContentStart(ContentStartOutput),
    TextOutput(TextOutputEvent),
    AudioOutput(AudioOutputEvent),
    ToolUse(ToolUseEvent),
    ContentEnd(ContentEndOutput),
    CompletionStart,
    CompletionEnd(CompletionEndOutput),
    UsageEvent,
    /// Event kinds this client does not act on
    Other(String),
}

impl OutputEvent {
    /// Classify one output frame.
    ///
    /// Empty frames, invalid JSON and frames without an `event` object are
    /// decode errors.
    pub fn parse(frame: &[u8]) -> SonicResult<Self> {
        if frame.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(SonicError::Decode("empty frame".to_string()));
        }

        let value: serde_json::Value = serde_json::from_slice(frame)
            .map_err(|e| SonicError::Decode(format!("invalid JSON frame: {e}")))?;

        let event = value
            .get("event")
            .and_then(|e| e.as_object())
            .ok_or_else(|| SonicError::Decode("frame has no event object".to_string()))?;

        let Some((kind, body)) = event.iter().next() else {
            return Err(SonicError::Decode("event object is empty".to_string()));
        };

        fn body_as<T: serde::de::DeserializeOwned>(kind: &str, body: &serde_json::Value) -> SonicResult<T> {
            serde_json::from_value(body.clone())
                .map_err(|e| SonicError::Decode(format!("malformed {kind}: {e}")))
        }

        let parsed = match kind.as_str() {
            "contentStart" => Self::ContentStart(body_as(kind, body)?),
            "textOutput" => Self::TextOutput(body_as(kind, body)?),
            "audioOutput" => Self::AudioOutput(body_as(kind, body)?),
            "toolUse" => Self::ToolUse(body_as(kind, body)?),
            "contentEnd" => Self::ContentEnd(body_as(kind, body)?),
            "completionStart" => Self::CompletionStart,
            "completionEnd" => Self::CompletionEnd(body_as(kind, body)?),
            "usageEvent" => Self::UsageEvent,
            other => Self::Other(other.to_string()),
        };
        Ok(parsed)
    }
}
