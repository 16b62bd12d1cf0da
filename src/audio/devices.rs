use tracing::info;

use super::capture::{AudioSource, CaptureBackend, CaptureFactory};
use super::output::{AudioOutput, OutputTarget, VirtualOutput};
use super::{CAPTURE_FRAME_SIZE, OUTPUT_SAMPLE_RATE};
use crate::error::{VoiceError, VoiceResult};

/// Opens the input and output devices a session owns
///
/// Each call hands out a fresh, exclusively owned handle; dropping the
/// handle releases the device.
#[async_trait::async_trait]
pub trait AudioDevices: Send + Sync {
    async fn open_capture(&self) -> VoiceResult<Box<dyn CaptureBackend>>;

    async fn open_output(&self) -> VoiceResult<Box<dyn AudioOutput>>;
}

/// Host audio devices selected by configuration
#[derive(Debug, Clone)]
pub struct SystemAudio {
    pub input: AudioSource,
    pub output: OutputTarget,
    pub frame_size: usize,
}

impl SystemAudio {
    pub fn new(input: AudioSource, output: OutputTarget) -> Self {
        Self {
            input,
            output,
            frame_size: CAPTURE_FRAME_SIZE,
        }
    }
}

#[async_trait::async_trait]
impl AudioDevices for SystemAudio {
    async fn open_capture(&self) -> VoiceResult<Box<dyn CaptureBackend>> {
        CaptureFactory::create(self.input.clone(), self.frame_size)
    }

    async fn open_output(&self) -> VoiceResult<Box<dyn AudioOutput>> {
        match &self.output {
            OutputTarget::Discard => {
                info!("No output device, discarding AI audio");
                let (output, _handle) = VirtualOutput::wall_clock(OUTPUT_SAMPLE_RATE);
                Ok(Box::new(output))
            }

            OutputTarget::Speakers(device) => {
                #[cfg(feature = "devices")]
                {
                    let device = device.clone();
                    let output = tokio::task::spawn_blocking(move || {
                        super::device::SpeakerOutput::open(device.as_deref())
                    })
                    .await
                    .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))??;
                    Ok(Box::new(output))
                }

                #[cfg(not(feature = "devices"))]
                {
                    let _ = device;
                    Err(VoiceError::DeviceUnavailable(
                        "Speaker output requires the `devices` feature".to_string(),
                    ))
                }
            }
        }
    }
}
