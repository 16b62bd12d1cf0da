//! Playback scheduling for inbound AI audio
//!
//! Segments are laid back-to-back on the output clock: each one starts at
//! `max(clock, last_scheduled_end)`, so queued segments never overlap.
//! `flush` stops every segment the scheduler still tracks and enters
//! suppression, which holds until the session controller confirms the
//! peer has retired the cancelled turn.

use tracing::{debug, info};

use super::codec;
use super::frame::AudioFrame;
use super::output::{AudioOutput, SegmentId};
use super::DEFAULT_PLAYBACK_RATE;

/// A segment handed to the output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    /// Start on the output clock, in seconds
    pub start_time: f64,
    /// Rendered duration (after the playback-rate adjustment), in seconds
    pub duration: f64,
    pub turn_seq: Option<u64>,
}

impl ScheduledSegment {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// What `enqueue` did with a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnqueueOutcome {
    Scheduled(ScheduledSegment),
    /// Dropped: scheduler is suppressing audio after a flush
    Suppressed,
    /// Dropped: frame belongs to a turn at or before the expected one
    Stale,
    /// Dropped: frame had no samples
    Empty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub scheduled: u64,
    pub dropped_suppressed: u64,
    pub dropped_stale: u64,
    pub flushed: u64,
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    active: Vec<ScheduledSegment>,
    last_scheduled_end: f64,
    suppressed: bool,
    expected_turn_seq: u64,
    playback_rate: f32,
    next_segment_id: SegmentId,
    stats: PlaybackStats,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self::with_playback_rate(output, DEFAULT_PLAYBACK_RATE)
    }

    pub fn with_playback_rate(output: Box<dyn AudioOutput>, playback_rate: f32) -> Self {
        let playback_rate = if playback_rate.is_finite() && playback_rate > 0.0 {
            playback_rate
        } else {
            DEFAULT_PLAYBACK_RATE
        };

        info!(
            "Playback scheduler on {} ({}Hz, rate {:.2}x)",
            output.name(),
            output.sample_rate(),
            playback_rate
        );

        Self {
            output,
            active: Vec::new(),
            last_scheduled_end: 0.0,
            suppressed: false,
            expected_turn_seq: 0,
            playback_rate,
            next_segment_id: 0,
            stats: PlaybackStats::default(),
        }
    }

    /// Schedule an inbound frame after everything already queued
    pub fn enqueue(&mut self, frame: AudioFrame) -> EnqueueOutcome {
        if self.suppressed {
            self.stats.dropped_suppressed += 1;
            debug!("Dropping frame during suppression (turn {:?})", frame.turn_seq);
            return EnqueueOutcome::Suppressed;
        }

        if let Some(turn_seq) = frame.turn_seq {
            if turn_seq <= self.expected_turn_seq {
                self.stats.dropped_stale += 1;
                debug!(
                    "Dropping stale frame (turn {} <= expected {})",
                    turn_seq, self.expected_turn_seq
                );
                return EnqueueOutcome::Stale;
            }
        }

        if frame.is_empty() || frame.sample_rate == 0 {
            return EnqueueOutcome::Empty;
        }

        self.prune_finished();

        // Playing at `playback_rate` stretches the segment on the output clock
        let device_rate = self.output.sample_rate().max(1);
        let ratio = frame.sample_rate as f64 * self.playback_rate as f64 / device_rate as f64;
        let samples = codec::resample_by_ratio(&frame.to_f32(), ratio);
        if samples.is_empty() {
            return EnqueueOutcome::Empty;
        }

        let duration = samples.len() as f64 / device_rate as f64;
        let start_time = self.output.clock().max(self.last_scheduled_end);

        let segment = ScheduledSegment {
            id: self.next_segment_id,
            start_time,
            duration,
            turn_seq: frame.turn_seq,
        };
        self.next_segment_id += 1;

        self.output.schedule(segment.id, start_time, samples);
        self.active.push(segment);
        self.last_scheduled_end = segment.end_time();
        self.stats.scheduled += 1;

        EnqueueOutcome::Scheduled(segment)
    }

    /// Stop all scheduled audio now and suppress further frames
    ///
    /// Returns how many segments were cut.
    pub fn flush(&mut self) -> usize {
        let count = self.stop_all();
        self.suppressed = true;
        info!("Playback flushed ({} segments stopped), suppressing", count);
        count
    }

    /// Stop all scheduled audio without entering suppression
    pub fn stop_all(&mut self) -> usize {
        let count = self.active.len();
        for segment in self.active.drain(..) {
            self.output.stop(segment.id);
        }
        self.last_scheduled_end = 0.0;
        self.stats.flushed += count as u64;
        count
    }

    /// Leave suppression; frames tagged at or before `expected_turn_seq`
    /// stay filtered out
    pub fn clear_suppression(&mut self, expected_turn_seq: u64) {
        self.suppressed = false;
        self.expected_turn_seq = self.expected_turn_seq.max(expected_turn_seq);
        info!(
            "Playback resumed, expecting turns after {}",
            self.expected_turn_seq
        );
    }

    /// Whether any scheduled segment has yet to finish on the output clock
    pub fn is_rendering(&mut self) -> bool {
        self.prune_finished();
        !self.active.is_empty()
    }

    /// Segments still pending or playing
    pub fn active_segments(&mut self) -> &[ScheduledSegment] {
        self.prune_finished();
        &self.active
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub fn expected_turn_seq(&self) -> u64 {
        self.expected_turn_seq
    }

    pub fn last_scheduled_end(&self) -> f64 {
        self.last_scheduled_end
    }

    pub fn playback_rate(&self) -> f32 {
        self.playback_rate
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    fn prune_finished(&mut self) {
        let now = self.output.clock();
        self.active.retain(|segment| segment.end_time() > now);
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}
