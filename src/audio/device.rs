//! Microphone and speaker access through cpal
//!
//! cpal streams cannot move between threads, so each open device lives on a
//! dedicated thread that owns the stream until it is told to stop. Dropping
//! the Rust-side handle stops that thread and releases the device.

use std::collections::VecDeque;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};

use super::capture::CaptureBackend;
use super::frame::{AudioFrame, Direction};
use super::output::{AudioOutput, SegmentId};
use crate::error::{VoiceError, VoiceResult};

/// Names of available `(input, output)` devices
pub fn list_devices() -> VoiceResult<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();

    let inputs = host
        .input_devices()?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs = host
        .output_devices()?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok((inputs, outputs))
}

fn find_input(host: &Host, name: Option<&str>) -> VoiceResult<Device> {
    match name {
        Some(wanted) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| VoiceError::DeviceUnavailable(format!("Input device '{}' not found", wanted))),
        None => host
            .default_input_device()
            .ok_or_else(|| VoiceError::DeviceUnavailable("No default input device available".to_string())),
    }
}

fn find_output(host: &Host, name: Option<&str>) -> VoiceResult<Device> {
    match name {
        Some(wanted) => host
            .output_devices()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| VoiceError::DeviceUnavailable(format!("Output device '{}' not found", wanted))),
        None => host
            .default_output_device()
            .ok_or_else(|| VoiceError::DeviceUnavailable("No default output device available".to_string())),
    }
}

fn log_stream_error(err: cpal::StreamError) {
    error!("Audio stream error: {}", err);
}

/// Thread that keeps a cpal stream alive until shutdown
struct DeviceWorker {
    stop_tx: std::sync::mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl DeviceWorker {
    /// Build a stream on a fresh thread and wait until it is playing
    fn spawn<T, F>(thread_name: &str, build: F) -> VoiceResult<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce() -> VoiceResult<(cpal::Stream, T)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<VoiceResult<T>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Returns on explicit stop or when the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;

        let info = ready_rx
            .recv()
            .map_err(|_| VoiceError::DeviceUnavailable(format!("{} thread exited", thread_name)))??;

        Ok((
            Self {
                stop_tx,
                thread: Some(thread),
            },
            info,
        ))
    }
}

impl Drop for DeviceWorker {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio device thread panicked");
            }
        }
    }
}

/// Accumulates device callbacks into fixed-size mono frames
struct Framer {
    frame_size: usize,
    sample_rate: u32,
    channels: usize,
    pending: Vec<f32>,
    tx: mpsc::Sender<AudioFrame>,
}

impl Framer {
    fn push(&mut self, data: &[f32]) {
        if self.channels > 1 {
            for frame in data.chunks(self.channels) {
                self.pending.push(frame.iter().sum::<f32>() / frame.len() as f32);
            }
        } else {
            self.pending.extend_from_slice(data);
        }

        while self.pending.len() >= self.frame_size {
            let samples: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            let frame = AudioFrame::from_f32(&samples, self.sample_rate, Direction::Outbound);

            match self.tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("Capture consumer behind, dropping frame"),
                Err(TrySendError::Closed(_)) => {
                    self.pending.clear();
                    return;
                }
            }
        }
    }
}

/// Microphone capture backend
pub struct MicrophoneCapture {
    device_name: Option<String>,
    frame_size: usize,
    name: String,
    worker: Option<DeviceWorker>,
}

impl MicrophoneCapture {
    pub fn new(device_name: Option<String>, frame_size: usize) -> Self {
        Self {
            device_name,
            frame_size: frame_size.max(1),
            name: "microphone".to_string(),
            worker: None,
        }
    }
}

fn build_input(
    device_name: Option<&str>,
    frame_size: usize,
    tx: mpsc::Sender<AudioFrame>,
) -> VoiceResult<(cpal::Stream, (u32, String))> {
    let host = cpal::default_host();
    let device = find_input(&host, device_name)?;
    let name = device.name().unwrap_or_default();

    let supported = device.default_input_config()?;
    let config = supported.config();
    let sample_rate = config.sample_rate.0;

    info!(
        "Using input device: {} ({} Hz, {} channels, {:?})",
        name,
        sample_rate,
        config.channels,
        supported.sample_format()
    );

    let mut framer = Framer {
        frame_size,
        sample_rate,
        channels: config.channels.max(1) as usize,
        pending: Vec::with_capacity(frame_size * 2),
        tx,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| framer.push(data),
            log_stream_error,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let float_data: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                framer.push(&float_data);
            },
            log_stream_error,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let float_data: Vec<f32> = data
                    .iter()
                    .map(|&s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0)
                    .collect();
                framer.push(&float_data);
            },
            log_stream_error,
            None,
        )?,
        format => {
            return Err(VoiceError::DeviceUnavailable(format!(
                "Unsupported input sample format: {:?}",
                format
            )))
        }
    };

    stream.play()?;

    Ok((stream, (sample_rate, name)))
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneCapture {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<AudioFrame>> {
        if self.worker.is_some() {
            return Err(VoiceError::DeviceUnavailable(
                "Microphone is already capturing".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(64);
        let device_name = self.device_name.clone();
        let frame_size = self.frame_size;

        let (worker, (sample_rate, name)) = tokio::task::spawn_blocking(move || {
            DeviceWorker::spawn("audio-capture", move || {
                build_input(device_name.as_deref(), frame_size, tx)
            })
        })
        .await
        .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))??;

        info!("Microphone capture started: {} at {} Hz", name, sample_rate);

        self.name = name;
        self.worker = Some(worker);
        Ok(rx)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        if let Some(worker) = self.worker.take() {
            tokio::task::spawn_blocking(move || drop(worker))
                .await
                .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;
            info!("Microphone released: {}", self.name);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct QueuedSegment {
    id: SegmentId,
    start_frame: u64,
    samples: Vec<f32>,
    cursor: usize,
}

#[derive(Default)]
struct SpeakerState {
    queue: VecDeque<QueuedSegment>,
    frames_rendered: u64,
}

impl SpeakerState {
    fn next_sample(&mut self) -> f32 {
        let now = self.frames_rendered;
        self.frames_rendered += 1;

        loop {
            let Some(segment) = self.queue.front_mut() else {
                return 0.0;
            };
            if segment.cursor >= segment.samples.len() {
                self.queue.pop_front();
                continue;
            }
            if segment.start_frame > now {
                return 0.0;
            }
            let sample = segment.samples[segment.cursor];
            segment.cursor += 1;
            return sample;
        }
    }
}

/// Speaker output; its clock counts frames the device has pulled
pub struct SpeakerOutput {
    name: String,
    sample_rate: u32,
    state: Arc<Mutex<SpeakerState>>,
    _worker: DeviceWorker,
}

impl SpeakerOutput {
    /// Open an output device; blocks until the stream is playing
    pub fn open(device_name: Option<&str>) -> VoiceResult<Self> {
        let state = Arc::new(Mutex::new(SpeakerState::default()));
        let stream_state = Arc::clone(&state);
        let device_name = device_name.map(str::to_string);

        let (worker, (sample_rate, name)) = DeviceWorker::spawn("audio-output", move || {
            build_output(device_name.as_deref(), stream_state)
        })?;

        info!("Speaker output opened: {} at {} Hz", name, sample_rate);

        Ok(Self {
            name,
            sample_rate,
            state,
            _worker: worker,
        })
    }
}

fn build_output(
    device_name: Option<&str>,
    state: Arc<Mutex<SpeakerState>>,
) -> VoiceResult<(cpal::Stream, (u32, String))> {
    let host = cpal::default_host();
    let device = find_output(&host, device_name)?;
    let name = device.name().unwrap_or_default();

    let supported = device.default_output_config()?;
    let config = supported.config();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels.max(1) as usize;

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut state = state.lock();
                for frame in data.chunks_mut(channels) {
                    frame.fill(state.next_sample());
                }
            },
            log_stream_error,
            None,
        )?,
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mut state = state.lock();
                for frame in data.chunks_mut(channels) {
                    let sample = (state.next_sample().clamp(-1.0, 1.0) * 32767.0) as i16;
                    frame.fill(sample);
                }
            },
            log_stream_error,
            None,
        )?,
        format => {
            return Err(VoiceError::DeviceUnavailable(format!(
                "Unsupported output sample format: {:?}",
                format
            )))
        }
    };

    stream.play()?;

    Ok((stream, (sample_rate, name)))
}

impl AudioOutput for SpeakerOutput {
    fn clock(&self) -> f64 {
        self.state.lock().frames_rendered as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, id: SegmentId, start_at: f64, samples: Vec<f32>) {
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        self.state.lock().queue.push_back(QueuedSegment {
            id,
            start_frame,
            samples,
            cursor: 0,
        });
    }

    fn stop(&mut self, id: SegmentId) {
        self.state.lock().queue.retain(|segment| segment.id != id);
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        &self.name
    }
}
