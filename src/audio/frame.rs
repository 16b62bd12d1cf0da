use std::sync::Arc;

use super::codec;

/// Which way a frame travels relative to this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Captured locally, headed for the remote peer
    Outbound,
    /// Received from the remote peer, headed for the speakers
    Inbound,
}

/// Mono PCM16 audio buffer
///
/// Frames are never mutated once built; transforms produce new frames.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Signed 16-bit samples, mono
    pub samples: Arc<[i16]>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    pub direction: Direction,
    /// Turn the peer tagged this audio with (inbound only)
    pub turn_seq: Option<u64>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, direction: Direction) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            direction,
            turn_seq: None,
        }
    }

    /// Quantize float samples (clamped to [-1.0, 1.0]) into a frame
    pub fn from_f32(samples: &[f32], sample_rate: u32, direction: Direction) -> Self {
        Self::new(codec::float_to_pcm16(samples), sample_rate, direction)
    }

    pub fn with_turn_seq(self, turn_seq: Option<u64>) -> Self {
        Self { turn_seq, ..self }
    }

    pub fn to_f32(&self) -> Vec<f32> {
        codec::pcm16_to_float(&self.samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds at the frame's own sample rate
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}
