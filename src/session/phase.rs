use serde::{Deserialize, Serialize};

/// Conversation progress, independent of transport health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    Idle,
    Active,
    Interrupted,
    /// Terminal
    Ended,
}

impl ConversationPhase {
    pub fn is_terminal(self) -> bool {
        self == ConversationPhase::Ended
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Inputs that can move the phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    HandshakeSucceeded,
    /// Transport went away without the caller asking
    TransportClosed { conversation_started: bool },
    /// Caller-initiated reconnect completed its handshake
    ReconnectSucceeded,
    PeerTerminated,
    CallerClosed,
}

/// Next phase for `(phase, event)`; pairs with no rule keep the phase
pub fn transition(phase: ConversationPhase, event: PhaseEvent) -> ConversationPhase {
    use ConversationPhase::*;

    match (phase, event) {
        (Ended, _) => Ended,
        (_, PhaseEvent::PeerTerminated) | (_, PhaseEvent::CallerClosed) => Ended,

        (Idle, PhaseEvent::HandshakeSucceeded) => Active,
        (Idle, PhaseEvent::ReconnectSucceeded) => Active,

        (Active, PhaseEvent::TransportClosed { conversation_started: true }) => Interrupted,
        (Active, PhaseEvent::TransportClosed { conversation_started: false }) => Idle,

        (Interrupted, PhaseEvent::ReconnectSucceeded) => Active,
        (Interrupted, PhaseEvent::HandshakeSucceeded) => Active,

        (current, _) => current,
    }
}
