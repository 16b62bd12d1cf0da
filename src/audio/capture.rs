use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::file::AudioFile;
use super::frame::{AudioFrame, Direction};
use super::CAPTURE_FRAME_SIZE;
use crate::error::{VoiceError, VoiceResult};

/// Where captured audio comes from
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// Microphone input (`None` = host default device)
    Microphone(Option<String>),
    /// Replay a WAV file as if it were the microphone
    File(PathBuf),
}

/// Audio capture backend trait
///
/// Implementations own the input device exclusively between `start` and
/// `stop`, and must release it on drop as well.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing
    ///
    /// Returns a channel receiver that yields fixed-size mono frames at the
    /// device's native rate.
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> VoiceResult<()>;

    fn is_capturing(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Capture backend factory
pub struct CaptureFactory;

impl CaptureFactory {
    pub fn create(source: AudioSource, frame_size: usize) -> VoiceResult<Box<dyn CaptureBackend>> {
        match source {
            AudioSource::Microphone(device) => {
                #[cfg(feature = "devices")]
                {
                    Ok(Box::new(super::device::MicrophoneCapture::new(device, frame_size)))
                }

                #[cfg(not(feature = "devices"))]
                {
                    let _ = (device, frame_size);
                    Err(VoiceError::DeviceUnavailable(
                        "Microphone capture requires the `devices` feature".to_string(),
                    ))
                }
            }

            AudioSource::File(path) => Ok(Box::new(WavFileCapture::new(path, frame_size))),
        }
    }
}

/// Drives a capture backend and pushes every frame to a single callback
///
/// The callback runs once per frame, in capture order, and must not block.
pub struct CapturePipeline {
    backend: Box<dyn CaptureBackend>,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn new(backend: Box<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            task: None,
        }
    }

    pub async fn start<F>(&mut self, mut on_frame: F) -> VoiceResult<()>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        if self.task.is_some() {
            warn!("Capture already started on {}", self.backend.name());
            return Ok(());
        }

        let mut frames = self.backend.start().await?;
        let name = self.backend.name().to_string();

        info!("Capture pipeline started: {}", name);

        self.task = Some(tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                on_frame(frame);
            }
            debug!("Capture stream ended: {}", name);
        }));

        Ok(())
    }

    pub async fn stop(&mut self) -> VoiceResult<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let result = self.backend.stop().await;
        info!("Capture pipeline stopped: {}", self.backend.name());
        result
    }

    pub fn is_capturing(&self) -> bool {
        self.task.is_some() && self.backend.is_capturing()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Capture backend that replays a WAV file at real-time pace
pub struct WavFileCapture {
    path: PathBuf,
    frame_size: usize,
    name: String,
    task: Option<JoinHandle<()>>,
}

impl WavFileCapture {
    pub fn new(path: PathBuf, frame_size: usize) -> Self {
        let name = format!("wav:{}", path.display());
        Self {
            path,
            frame_size: if frame_size == 0 { CAPTURE_FRAME_SIZE } else { frame_size },
            name,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for WavFileCapture {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            return Err(VoiceError::DeviceUnavailable(format!(
                "{} is already capturing",
                self.name
            )));
        }

        let path = self.path.clone();
        let file = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?
            .map_err(|e| VoiceError::DeviceUnavailable(format!("{:#}", e)))?;

        if file.sample_rate == 0 {
            return Err(VoiceError::DeviceUnavailable(format!(
                "{} has a zero sample rate",
                self.name
            )));
        }

        let (tx, rx) = mpsc::channel(64);
        let frame_size = self.frame_size;
        let pace = Duration::from_secs_f64(frame_size as f64 / file.sample_rate as f64);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pace);

            for chunk in file.samples.chunks(frame_size) {
                ticker.tick().await;

                // Pad the tail so every frame has the same length
                let mut samples = chunk.to_vec();
                samples.resize(frame_size, 0.0);

                let frame = AudioFrame::from_f32(&samples, file.sample_rate, Direction::Outbound);
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WavFileCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
