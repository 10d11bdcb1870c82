//! Realtime API wire messages
//!
//! Client and server events are JSON objects discriminated by their `type`
//! field. Each is modelled as one enum variant carrying only that event's
//! fields.

use crate::error::{RealtimeError, Result};
use crate::tools::ToolSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Transcription model requested for the user's audio
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";


/// Turn detection mode. Only server-side voice activity detection is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// Output voice of the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Alloy,
    Echo,
    Shimmer,
}

impl FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alloy" => Ok(Self::Alloy),
            "echo" => Ok(Self::Echo),
            "shimmer" => Ok(Self::Shimmer),
            other => Err(format!("unknown voice `{}` (expected alloy, echo or shimmer)", other)),
        }
    }
}

/// Optional, user-supplied parts of the session configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub instructions: Option<String>,
    pub temperature: Option<f32>,
    pub voice: Option<Voice>,
}

/// Payload of `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    pub turn_detection: TurnDetection,
    pub input_audio_transcription: InputAudioTranscription,
    pub tools: Vec<ToolSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<Voice>,
}

impl SessionConfig {
    /// Assemble the session configuration. Empty instructions are left out.
    pub fn new(tools: Vec<ToolSchema>, options: &SessionOptions) -> Self {
        Self {
            turn_detection: TurnDetection::ServerVad,
            input_audio_transcription: InputAudioTranscription {
                model: TRANSCRIPTION_MODEL.to_string(),
            },
            tools,
            instructions: options
                .instructions
                .clone()
                .filter(|text| !text.trim().is_empty()),
            temperature: options.temperature.filter(|t| t.is_finite()),
            voice: options.voice,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

/// Conversation item created by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput { call_id: String, output: String },
    Message { role: Role, content: Vec<ContentPart> },
}

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate {},
}

impl ClientMessage {
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::Message {
                role: Role::User,
                content: vec![ContentPart::InputText { text: text.into() }],
            },
        }
    }

    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate {} => "response.create",
        }
    }
}

/// Error detail carried by a server `error` event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.code) {
            (Some(kind), Some(code)) => write!(f, "{} ({}/{})", self.message, kind, code),
            (Some(kind), None) => write!(f, "{} ({})", self.message, kind),
            _ => f.write_str(&self.message),
        }
    }
}

/// Server -> client messages
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },

    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        transcript: String,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Value,
    },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        arguments: String,
    },

    #[serde(rename = "error")]
    Error { error: ApiError },

    /// Any event type this client does not act on
    #[serde(skip)]
    Other { kind: String, raw: Value },
}

impl ServerMessage {
    /// Event types with a dedicated variant
    pub const KNOWN_KINDS: [&'static str; 8] = [
        "session.created",
        "response.audio_transcript.delta",
        "response.audio.delta",
        "input_audio_buffer.speech_started",
        "conversation.item.input_audio_transcription.completed",
        "response.done",
        "response.function_call_arguments.done",
        "error",
    ];

    /// Parse one server event. Unknown event types become [`ServerMessage::Other`];
    /// known types with missing or mistyped fields are errors.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RealtimeError::Protocol("message has no type".to_string()))?
            .to_string();

        if !Self::KNOWN_KINDS.contains(&kind.as_str()) {
            return Ok(Self::Other { kind, raw: value });
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The wire `type` of this message.
    pub fn kind(&self) -> &str {
        match self {
            Self::SessionCreated { .. } => "session.created",
            Self::AudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            Self::AudioDelta { .. } => "response.audio.delta",
            Self::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            Self::InputTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            Self::ResponseDone { .. } => "response.done",
            Self::FunctionCallArgumentsDone { .. } => "response.function_call_arguments.done",
            Self::Error { .. } => "error",
            Self::Other { kind, .. } => kind,
        }
    }
}
