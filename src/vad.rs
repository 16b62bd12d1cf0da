//! Energy-based voice activity detection and barge-in gating
//!
//! Two independent sources can decide the user is talking over the AI:
//!
//! - local RMS energy on captured frames, gated by `sustained_duration`
//! - the server's `user.speaking.started` signal, gated by
//!   `server_sustained_duration`
//!
//! Whichever crosses its gate first wins. A single `barge_in_triggered`
//! flag makes the other one a no-op for the rest of that activity window.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Tuning for barge-in detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VadConfig {
    /// RMS level (0.0 - 1.0) above which a frame counts as voice
    pub energy_threshold: f32,
    /// How long local energy must stay above threshold before barge-in
    pub sustained_duration: Duration,
    /// How long after a server speech signal before barge-in
    pub server_sustained_duration: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            sustained_duration: Duration::from_millis(300),
            server_sustained_duration: Duration::from_millis(1500),
        }
    }
}

/// Ephemeral state of the current activity window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceActivityWindow {
    pub activity_started_at: Option<Instant>,
    pub barge_in_triggered: bool,
}

/// What caused a barge-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BargeInSource {
    LocalEnergy,
    ServerVad,
    /// Caller started recording over AI audio
    Recording,
    /// Caller sent a text turn over AI audio
    TextInput,
    /// Caller asked for it explicitly
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Silence,
    Speech,
    BargeIn(BargeInSource),
}

/// Root-mean-square energy of a frame
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

pub struct VoiceActivityDetector {
    config: VadConfig,
    window: VoiceActivityWindow,
    server_speech_started_at: Option<Instant>,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            window: VoiceActivityWindow::default(),
            server_speech_started_at: None,
        }
    }

    /// Feed one captured frame
    pub fn observe(&mut self, samples: &[f32], now: Instant, playback_active: bool) -> VadDecision {
        self.observe_energy(rms(samples), now, playback_active)
    }

    /// Feed the energy of one captured frame
    pub fn observe_energy(&mut self, energy: f32, now: Instant, playback_active: bool) -> VadDecision {
        if energy <= self.config.energy_threshold {
            if self.window.activity_started_at.is_some() {
                debug!("Voice activity ended (rms {:.4})", energy);
            }
            self.window = VoiceActivityWindow::default();
            return VadDecision::Silence;
        }

        let Some(started_at) = self.window.activity_started_at else {
            self.window.activity_started_at = Some(now);
            return VadDecision::Speech;
        };

        let elapsed = now.saturating_duration_since(started_at);
        if elapsed >= self.config.sustained_duration
            && playback_active
            && !self.window.barge_in_triggered
        {
            info!(
                "Local barge-in: {:?} of sustained voice (rms {:.4})",
                elapsed, energy
            );
            self.trigger();
            return VadDecision::BargeIn(BargeInSource::LocalEnergy);
        }

        VadDecision::Speech
    }

    /// Server reported the user started speaking
    pub fn server_speech_started(&mut self, now: Instant) {
        if self.window.barge_in_triggered {
            return;
        }
        if self.server_speech_started_at.is_none() {
            debug!("Server VAD armed");
            self.server_speech_started_at = Some(now);
        }
    }

    /// Server finished the user's utterance; the pending check is moot
    pub fn server_speech_ended(&mut self) {
        self.server_speech_started_at = None;
    }

    /// Check the pending server signal against its duration gate
    pub fn poll_server(&mut self, now: Instant, playback_active: bool) -> VadDecision {
        let Some(started_at) = self.server_speech_started_at else {
            return VadDecision::Silence;
        };

        let elapsed = now.saturating_duration_since(started_at);
        if elapsed < self.config.server_sustained_duration {
            return VadDecision::Speech;
        }

        // Gate passed; either it fires now or it never will
        self.server_speech_started_at = None;

        if playback_active && !self.window.barge_in_triggered {
            info!("Server barge-in after {:?}", elapsed);
            self.trigger();
            return VadDecision::BargeIn(BargeInSource::ServerVad);
        }

        VadDecision::Silence
    }

    /// Record a barge-in decided elsewhere so neither source re-fires it
    pub fn mark_triggered(&mut self) {
        self.trigger();
    }

    pub fn window(&self) -> VoiceActivityWindow {
        self.window
    }

    pub fn server_pending(&self) -> bool {
        self.server_speech_started_at.is_some()
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.window = VoiceActivityWindow::default();
        self.server_speech_started_at = None;
    }

    fn trigger(&mut self) {
        self.window.barge_in_triggered = true;
        self.server_speech_started_at = None;
    }
}
