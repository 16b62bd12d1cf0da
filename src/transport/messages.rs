//! Wire messages exchanged with the realtime voice peer
//!
//! Every frame is a JSON object with a `type` tag. Outbound messages are
//! [`ClientMessage`]; inbound ones parse into [`ServerMessage`], where tags
//! outside the catalogue land in `Unknown` and are ignored.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Client → peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Local playback is primed; the peer may start speaking
    #[serde(rename = "client.ready")]
    ClientReady,

    /// One captured frame, base64 PCM16 at 16kHz
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    /// End of the current input turn
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<ResponseOptions>,
    },

    /// Barge-in: drop the response in progress
    #[serde(rename = "response.cancel")]
    ResponseCancel,

    /// Text-only user turn
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseOptions {
    pub modalities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub role: String,
    pub content: Vec<ItemContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl ClientMessage {
    /// Ask for a spoken and transcribed reply
    pub fn audio_response() -> Self {
        Self::ResponseCreate {
            response: Some(ResponseOptions {
                modalities: vec!["audio".to_string(), "text".to_string()],
            }),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem {
                item_type: "message".to_string(),
                role: "user".to_string(),
                content: vec![ItemContent {
                    content_type: "input_text".to_string(),
                    text: text.into(),
                }],
            },
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::ClientReady => "client.ready",
            Self::InputAudioAppend { .. } => "input_audio_buffer.append",
            Self::InputAudioCommit => "input_audio_buffer.commit",
            Self::ResponseCreate { .. } => "response.create",
            Self::ResponseCancel => "response.cancel",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
        }
    }
}

/// Peer → client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Handshake complete
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated,

    #[serde(rename = "user.transcription")]
    UserTranscription { transcript: String },

    /// Server-side VAD heard the user
    #[serde(rename = "user.speaking.started")]
    UserSpeakingStarted,

    /// AI audio, base64 PCM16 at 24kHz
    #[serde(rename = "audio.delta")]
    AudioDelta {
        delta: String,
        #[serde(rename = "turnSeq", default)]
        turn_seq: Option<u64>,
    },

    #[serde(rename = "audio.done")]
    AudioDone,

    #[serde(rename = "ai.transcription.delta")]
    AiTranscriptionDelta { text: String },

    #[serde(rename = "ai.transcription.done")]
    AiTranscriptionDone {
        text: String,
        #[serde(default)]
        emotion: Option<String>,
        #[serde(rename = "emotionReason", default)]
        emotion_reason: Option<String>,
    },

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "response.interrupted")]
    ResponseInterrupted,

    /// The cancelled turn is retired; audio for `turn_seq` may flow
    #[serde(rename = "response.ready")]
    ResponseReady {
        #[serde(rename = "turnSeq", default)]
        turn_seq: Option<u64>,
    },

    #[serde(rename = "session.warning")]
    SessionWarning {
        message: String,
        /// Seconds until the session is cut
        #[serde(rename = "timeLeft", default)]
        time_left: Option<f64>,
    },

    /// Peer is reconnecting to its upstream model
    #[serde(rename = "session.reconnecting")]
    SessionReconnecting {
        attempt: u32,
        #[serde(rename = "maxAttempts")]
        max_attempts: u32,
    },

    #[serde(rename = "session.reconnected")]
    SessionReconnected,

    #[serde(rename = "session.terminated")]
    SessionTerminated {
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "error")]
    Error { error: serde_json::Value },

    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Parse one text frame
    ///
    /// Unrecognized `type` tags are logged and returned as `Unknown`; a
    /// recognized tag with a malformed payload is an error.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let message: ServerMessage = serde_json::from_str(text)?;

        if message == ServerMessage::Unknown {
            #[derive(Deserialize)]
            struct TypePeek {
                #[serde(rename = "type")]
                message_type: Option<String>,
            }

            let peek: TypePeek = serde_json::from_str(text)?;
            warn!(
                "Ignoring unrecognized message type: {}",
                peek.message_type.as_deref().unwrap_or("<missing>")
            );
        }

        Ok(message)
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::SessionCreated => "session.created",
            Self::ConversationItemCreated => "conversation.item.created",
            Self::UserTranscription { .. } => "user.transcription",
            Self::UserSpeakingStarted => "user.speaking.started",
            Self::AudioDelta { .. } => "audio.delta",
            Self::AudioDone => "audio.done",
            Self::AiTranscriptionDelta { .. } => "ai.transcription.delta",
            Self::AiTranscriptionDone { .. } => "ai.transcription.done",
            Self::ResponseDone => "response.done",
            Self::ResponseInterrupted => "response.interrupted",
            Self::ResponseReady { .. } => "response.ready",
            Self::SessionWarning { .. } => "session.warning",
            Self::SessionReconnecting { .. } => "session.reconnecting",
            Self::SessionReconnected => "session.reconnected",
            Self::SessionTerminated { .. } => "session.terminated",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Human-readable text from an `error` payload (string or `{ message }`)
pub fn error_text(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}
