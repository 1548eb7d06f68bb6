//! Wire messages of the streaming duplex protocol
//!
//! JSON text frames. The client opens with `setup`, then streams
//! `realtimeInput` media chunks and answers `toolCall`s with
//! `toolResponse`. The server acknowledges with `setupComplete`, sends
//! model audio in `serverContent` and requests tools with `toolCall`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{ToolCallRequest, ToolCallResponse, ToolDeclaration};

/// Inline media payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64 data
    pub data: String,
}

/// Client → server message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// A single media chunk
    #[must_use]
    pub fn media(mime_type: impl Into<String>, data: String) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: mime_type.into(),
                data,
            }],
        })
    }

    /// Resolved tool calls
    #[must_use]
    pub fn tool_response(responses: Vec<ToolCallResponse>) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: responses,
        })
    }

    /// JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Session configuration sent first
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// `models/<id>`
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolGroup>,
}

impl Setup {
    /// Audio-response setup for `model_id`
    #[must_use]
    pub fn audio(
        model_id: &str,
        voice: &str,
        system_instruction: &str,
        declarations: &[ToolDeclaration],
    ) -> Self {
        Self {
            model: format!("models/{model_id}"),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoice {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part::text(system_instruction)],
            },
            tools: vec![ToolGroup {
                function_declarations: declarations.to_vec(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoice {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolGroup {
    pub function_declarations: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<ToolCallResponse>,
}

/// Server → client message
///
/// Every field is optional; one frame may carry several.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
}

impl ServerMessage {
    /// Parse a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not a JSON object
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether this acknowledges `setup`
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Inline audio parts in arrival order
    pub fn audio_chunks(&self) -> impl Iterator<Item = &Blob> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type.starts_with("audio/"))
    }

    /// Tool calls requested by the model
    #[must_use]
    pub fn function_calls(&self) -> &[ToolCallRequest] {
        match &self.tool_call {
            Some(call) => &call.function_calls,
            None => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<ToolCallRequest>,
}

/// A list of parts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Text or inline data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

/// Sample rate from a mime type like `audio/pcm;rate=24000`
#[must_use]
pub fn mime_sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}
