use super::phase::{ConnectionStatus, ConversationPhase};
use super::stats::TranscriptSegment;
use crate::vad::BargeInSource;

/// Everything a caller can observe about a running session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged(ConnectionStatus),
    PhaseChanged {
        from: ConversationPhase,
        to: ConversationPhase,
    },
    UserTranscript(String),
    /// Partial AI text, in arrival order
    AiTranscriptDelta(String),
    AiTranscriptDone(TranscriptSegmentView),
    BargeIn {
        turn_sequence: u64,
        source: BargeInSource,
    },
    /// Suppression lifted; audio after `expected_turn_seq` plays again
    ResponseReady { expected_turn_seq: u64 },
    ResponseDone,
    ResponseInterrupted,
    Warning {
        message: String,
        time_left_secs: Option<f64>,
    },
    Reconnecting { attempt: u32, max_attempts: u32 },
    Reconnected,
    Terminated { reason: Option<String> },
    /// Session-level failure the caller should react to
    Error(String),
}

/// Text and emotion of a finished AI line
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegmentView {
    pub text: String,
    pub emotion: Option<String>,
    pub emotion_reason: Option<String>,
}

impl From<&TranscriptSegment> for TranscriptSegmentView {
    fn from(segment: &TranscriptSegment) -> Self {
        Self {
            text: segment.text.clone(),
            emotion: segment.emotion.clone(),
            emotion_reason: segment.emotion_reason.clone(),
        }
    }
}
