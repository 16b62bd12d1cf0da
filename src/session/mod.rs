//! Voice session management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - The transport link and its handshake, reconnect and termination
//! - The conversation phase state machine
//! - Turn sequencing and barge-in
//! - Transcript collection and session statistics

mod config;
mod controller;
mod events;
mod phase;
mod state;
mod stats;

pub use config::SessionConfig;
pub use controller::SessionController;
pub use events::{SessionEvent, TranscriptSegmentView};
pub use phase::{transition, ConnectionStatus, ConversationPhase, PhaseEvent};
pub use state::SessionCore;
pub use stats::{SessionStats, Speaker, TranscriptSegment};
