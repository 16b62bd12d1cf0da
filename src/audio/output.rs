//! Audio output sinks
//!
//! An [`AudioOutput`] renders scheduled segments against its own monotonic
//! clock. The clock only moves forward while the sink is alive and is
//! expressed in seconds of rendered audio.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Identifies one scheduled segment on an output
pub type SegmentId = u64;

/// Where decoded AI audio is rendered
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTarget {
    /// Speaker output (`None` = host default device)
    Speakers(Option<String>),
    /// No device; the clock follows wall time and audio is discarded
    Discard,
}

/// Audio output device
pub trait AudioOutput: Send {
    /// Current position of the output clock, in seconds
    fn clock(&self) -> f64;

    /// Queue samples (already at `sample_rate()`) to begin at `start_at`
    /// seconds on the output clock
    fn schedule(&mut self, id: SegmentId, start_at: f64, samples: Vec<f32>);

    /// Silence a segment immediately, whether it is pending or playing
    fn stop(&mut self, id: SegmentId);

    /// Device sample rate in Hz
    fn sample_rate(&self) -> u32;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy)]
enum ClockSource {
    Manual,
    Wall(Instant),
}

#[derive(Debug, Default)]
struct VirtualState {
    clock: f64,
    scheduled: Vec<(SegmentId, f64, usize)>,
    stopped: Vec<SegmentId>,
}

/// Output without a device
///
/// With a manual clock the owner of the [`VirtualOutputHandle`] advances
/// time; with a wall clock time follows `Instant::now()`.
pub struct VirtualOutput {
    sample_rate: u32,
    source: ClockSource,
    state: Arc<Mutex<VirtualState>>,
}

/// Observer/driver side of a [`VirtualOutput`]
#[derive(Clone)]
pub struct VirtualOutputHandle {
    sample_rate: u32,
    source: ClockSource,
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualOutput {
    /// Output whose clock only moves through [`VirtualOutputHandle::advance`]
    pub fn manual(sample_rate: u32) -> (Self, VirtualOutputHandle) {
        Self::with_source(sample_rate, ClockSource::Manual)
    }

    /// Output whose clock follows wall time
    pub fn wall_clock(sample_rate: u32) -> (Self, VirtualOutputHandle) {
        Self::with_source(sample_rate, ClockSource::Wall(Instant::now()))
    }

    fn with_source(sample_rate: u32, source: ClockSource) -> (Self, VirtualOutputHandle) {
        let state = Arc::new(Mutex::new(VirtualState::default()));
        let handle = VirtualOutputHandle {
            sample_rate,
            source,
            state: Arc::clone(&state),
        };
        (
            Self {
                sample_rate,
                source,
                state,
            },
            handle,
        )
    }
}

fn read_clock(source: ClockSource, state: &VirtualState) -> f64 {
    match source {
        ClockSource::Manual => state.clock,
        ClockSource::Wall(opened) => opened.elapsed().as_secs_f64(),
    }
}

impl AudioOutput for VirtualOutput {
    fn clock(&self) -> f64 {
        read_clock(self.source, &self.state.lock())
    }

    fn schedule(&mut self, id: SegmentId, start_at: f64, samples: Vec<f32>) {
        self.state.lock().scheduled.push((id, start_at, samples.len()));
    }

    fn stop(&mut self, id: SegmentId) {
        self.state.lock().stopped.push(id);
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        match self.source {
            ClockSource::Manual => "virtual",
            ClockSource::Wall(_) => "discard",
        }
    }
}

impl VirtualOutputHandle {
    /// Move a manual clock forward
    pub fn advance(&self, secs: f64) {
        self.state.lock().clock += secs.max(0.0);
    }

    pub fn clock(&self) -> f64 {
        read_clock(self.source, &self.state.lock())
    }

    /// Number of segments ever scheduled
    pub fn scheduled_count(&self) -> usize {
        self.state.lock().scheduled.len()
    }

    /// Number of stop calls received
    pub fn stopped_count(&self) -> usize {
        self.state.lock().stopped.len()
    }

    /// Segments that would still produce sound at the current clock
    pub fn audible_segments(&self) -> usize {
        let state = self.state.lock();
        let now = read_clock(self.source, &state);
        state
            .scheduled
            .iter()
            .filter(|(id, start, len)| {
                let end = start + *len as f64 / self.sample_rate as f64;
                end > now && !state.stopped.contains(id)
            })
            .count()
    }

    /// `(start_at, duration)` of every scheduled segment, in schedule order
    pub fn timeline(&self) -> Vec<(f64, f64)> {
        self.state
            .lock()
            .scheduled
            .iter()
            .map(|(_, start, len)| (*start, *len as f64 / self.sample_rate as f64))
            .collect()
    }
}
