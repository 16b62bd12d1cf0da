//! Error types for the voice session

use thiserror::Error;

/// Result type alias for voice session operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors surfaced by the voice session and its components
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Microphone (or speaker) access denied or no device present
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Connection dropped, refused, or failed mid-stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// Audio payload could not be decoded into PCM16 samples
    #[error("Invalid audio frame: {0}")]
    InvalidFrame(String),

    /// The remote peer ended the session; never retried
    #[error("Session terminated by peer: {0}")]
    SessionTerminatedByPeer(String),

    #[error("Authentication token unavailable: {0}")]
    Auth(String),

    #[error("Timed out after {0}ms while {1}")]
    Timeout(u64, &'static str),

    #[error("Session has ended")]
    SessionEnded,

    #[error("Session is not connected")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::Transport(format!("Malformed message: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Transport(err.to_string())
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::InvalidFrame(err.to_string())
    }
}

#[cfg(feature = "devices")]
impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

#[cfg(feature = "devices")]
impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

#[cfg(feature = "devices")]
impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

#[cfg(feature = "devices")]
impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

impl VoiceError {
    /// Whether the error should be surfaced to the caller as a session-level event
    /// (as opposed to being absorbed and logged by the component that hit it)
    pub fn is_session_level(&self) -> bool {
        !matches!(self, VoiceError::InvalidFrame(_))
    }
}
