pub mod capture;
pub mod codec;
pub mod devices;
pub mod file;
pub mod frame;
pub mod output;
pub mod playback;

#[cfg(feature = "devices")]
pub mod device;

pub use capture::{AudioSource, CaptureBackend, CaptureFactory, CapturePipeline, WavFileCapture};
pub use devices::{AudioDevices, SystemAudio};
pub use file::AudioFile;
pub use frame::{AudioFrame, Direction};
pub use output::{AudioOutput, OutputTarget, SegmentId, VirtualOutput, VirtualOutputHandle};
pub use playback::{EnqueueOutcome, PlaybackScheduler, PlaybackStats, ScheduledSegment};

/// Wire sample rate for outbound (microphone) audio
pub const INPUT_SAMPLE_RATE: u32 = 16000;
/// Wire sample rate for inbound (AI voice) audio
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;
/// Samples per captured frame, at the device's native rate
pub const CAPTURE_FRAME_SIZE: usize = 4096;
/// Playback speed applied to AI audio for intelligibility
pub const DEFAULT_PLAYBACK_RATE: f32 = 0.9;
