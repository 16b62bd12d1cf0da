//! PCM16 frame codec
//!
//! Converts between float sample buffers, little-endian PCM16 and the base64
//! text carried on the wire, and resamples between device and wire rates.
//!
//! Resampling is nearest-neighbor index mapping: output length is
//! `floor(len / ratio)` and output sample `i` is input sample
//! `floor(i * ratio)`. This aliases on downsampling and steps on upsampling;
//! it is accepted as an approximation because it adds no latency and no
//! filter state across frames.

use base64::Engine;

use super::frame::{AudioFrame, Direction};
use super::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::error::{VoiceError, VoiceResult};

/// Nearest-neighbor resample from `from_rate` to `to_rate`
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return samples.to_vec();
    }
    resample_by_ratio(samples, from_rate as f64 / to_rate as f64)
}

/// Nearest-neighbor resample where `ratio` is input samples per output sample
pub fn resample_by_ratio(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() || !(ratio.is_finite() && ratio > 0.0) {
        return Vec::new();
    }

    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| samples[((i as f64 * ratio) as usize).min(last)])
        .collect()
}

/// Quantize floats to PCM16, clamping first so loud input saturates
/// instead of wrapping around
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn bytes_to_pcm16(bytes: &[u8]) -> VoiceResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::InvalidFrame(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode captured float samples into base64 PCM16 at the outbound wire rate
pub fn encode(samples: &[f32], source_rate: u32) -> VoiceResult<String> {
    if source_rate == 0 {
        return Err(VoiceError::InvalidFrame(
            "Source sample rate is zero".to_string(),
        ));
    }

    let resampled = resample(samples, source_rate, INPUT_SAMPLE_RATE);
    let pcm = float_to_pcm16(&resampled);

    Ok(base64::engine::general_purpose::STANDARD.encode(pcm16_to_bytes(&pcm)))
}

/// Encode an outbound frame for `input_audio_buffer.append`
pub fn encode_frame(frame: &AudioFrame) -> VoiceResult<String> {
    encode(&frame.to_f32(), frame.sample_rate)
}

/// Decode base64 PCM16 (inbound wire rate) into float samples
pub fn decode(payload: &str) -> VoiceResult<Vec<f32>> {
    Ok(pcm16_to_float(&decode_pcm16(payload)?))
}

/// Decode an `audio.delta` payload into an inbound frame at the inbound wire rate
pub fn decode_frame(payload: &str, turn_seq: Option<u64>) -> VoiceResult<AudioFrame> {
    let samples = decode_pcm16(payload)?;
    Ok(AudioFrame::new(samples, OUTPUT_SAMPLE_RATE, Direction::Inbound).with_turn_seq(turn_seq))
}

fn decode_pcm16(payload: &str) -> VoiceResult<Vec<i16>> {
    if payload.is_empty() {
        return Err(VoiceError::InvalidFrame("Empty audio payload".to_string()));
    }

    let bytes = base64::engine::general_purpose::STANDARD.decode(payload)?;
    bytes_to_pcm16(&bytes)
}
