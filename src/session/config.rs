use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{CAPTURE_FRAME_SIZE, DEFAULT_PLAYBACK_RATE};
use crate::vad::VadConfig;

/// Configuration for one conversation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Opaque identifiers from the conversation manager
    pub conversation_id: String,
    pub scenario_id: String,
    pub persona_id: String,

    /// Base WebSocket URL of the voice endpoint
    pub server_url: String,

    /// Samples per captured frame
    pub capture_frame_size: usize,

    /// Speed applied to AI audio (0.9 = 10% slower)
    pub playback_rate: f32,

    pub vad: VadConfig,

    /// Reconnect rounds before giving up
    pub max_reconnect_attempts: u32,

    /// Pause between reconnect rounds
    pub reconnect_backoff: Duration,

    pub token_timeout: Duration,

    /// Upper bound for socket open plus `session.created`
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            conversation_id: format!("conversation-{}", uuid::Uuid::new_v4()),
            scenario_id: String::new(),
            persona_id: String::new(),
            server_url: "ws://localhost:8080/api/voice".to_string(),
            capture_frame_size: CAPTURE_FRAME_SIZE,
            playback_rate: DEFAULT_PLAYBACK_RATE,
            vad: VadConfig::default(),
            max_reconnect_attempts: 3,
            reconnect_backoff: Duration::from_secs(1),
            token_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}
