use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::{ConnectionStatus, ConversationPhase};

/// Snapshot of a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub phase: ConversationPhase,

    pub status: ConnectionStatus,

    /// Local turn counter; advances on every barge-in
    pub turn_sequence: u64,

    /// Inbound frames tagged at or below this are stale
    pub expected_turn_seq: u64,

    /// Whether inbound audio is held back after a barge-in
    pub suppressed: bool,

    /// Captured frames sent to the peer
    pub frames_sent: u64,

    /// AI audio frames received
    pub frames_received: u64,

    /// AI audio frames dropped (suppressed, stale or undecodable)
    pub frames_dropped: u64,

    pub barge_ins: u64,

    pub transcript_segments_count: usize,

    pub has_conversation_started: bool,

    pub started_at: DateTime<Utc>,

    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
}

/// A completed utterance from either side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: Speaker,

    pub text: String,

    /// Persona emotion the peer attached to an AI line, if any
    pub emotion: Option<String>,

    pub emotion_reason: Option<String>,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,
}
