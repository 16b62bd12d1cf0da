pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod vad;

pub use audio::{
    AudioDevices, AudioFile, AudioFrame, AudioOutput, AudioSource, CaptureBackend, CapturePipeline,
    OutputTarget, PlaybackScheduler, SystemAudio, VirtualOutput,
};
pub use config::Config;
pub use error::{VoiceError, VoiceResult};
pub use session::{
    ConnectionStatus, ConversationPhase, SessionConfig, SessionController, SessionEvent,
    SessionStats, TranscriptSegment,
};
pub use transport::{ClientMessage, Connector, ServerMessage, TokenProvider, WebSocketConnector};
pub use vad::{BargeInSource, VadConfig, VoiceActivityDetector};
