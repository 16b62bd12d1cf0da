//! Mutable state of one voice session
//!
//! Everything the transport and capture callbacks touch (phase, turn
//! sequence, suppression, VAD window) lives here. The controller keeps a
//! single instance behind one mutex and never holds it across an await, so
//! inbound messages, captured frames and the VAD tick are applied one at a
//! time in arrival order.

use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::events::{SessionEvent, TranscriptSegmentView};
use super::phase::{transition, ConnectionStatus, ConversationPhase, PhaseEvent};
use super::stats::{SessionStats, Speaker, TranscriptSegment};
use crate::audio::{codec, AudioFrame, EnqueueOutcome, PlaybackScheduler};
use crate::error::{VoiceError, VoiceResult};
use crate::transport::messages::error_text;
use crate::transport::{ClientMessage, ServerMessage, TransportSender};
use crate::vad::{BargeInSource, VadDecision, VoiceActivityDetector};

pub struct SessionCore {
    session_id: String,
    status: ConnectionStatus,
    phase: ConversationPhase,
    turn_sequence: u64,
    expected_turn_seq: u64,
    has_conversation_started: bool,
    recording: bool,
    vad: VoiceActivityDetector,
    playback: Option<PlaybackScheduler>,
    transport: Option<TransportSender>,
    events: broadcast::Sender<SessionEvent>,
    transcript: Vec<TranscriptSegment>,
    pending_ai_text: String,
    frames_sent: u64,
    frames_received: u64,
    frames_dropped: u64,
    barge_ins: u64,
    started_at: chrono::DateTime<Utc>,
}

impl SessionCore {
    pub fn new(config: &SessionConfig, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            session_id: format!("{}-{}", config.conversation_id, uuid::Uuid::new_v4()),
            status: ConnectionStatus::Disconnected,
            phase: ConversationPhase::Idle,
            turn_sequence: 1,
            expected_turn_seq: 0,
            has_conversation_started: false,
            recording: false,
            vad: VoiceActivityDetector::new(config.vad),
            playback: None,
            transport: None,
            events,
            transcript: Vec::new(),
            pending_ai_text: String::new(),
            frames_sent: 0,
            frames_received: 0,
            frames_dropped: 0,
            barge_ins: 0,
            started_at: Utc::now(),
        }
    }

    // ---- wiring ----

    pub fn attach_transport(&mut self, sender: TransportSender) {
        self.transport = Some(sender);
    }

    pub fn detach_transport(&mut self) -> Option<TransportSender> {
        self.transport.take()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn attach_playback(&mut self, mut scheduler: PlaybackScheduler) {
        if self.expected_turn_seq > 0 {
            scheduler.clear_suppression(self.expected_turn_seq);
        }
        self.playback = Some(scheduler);
    }

    pub fn has_playback(&self) -> bool {
        self.playback.is_some()
    }

    /// Stop all AI audio and give the output device back
    pub fn release_playback(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            playback.stop_all();
            info!("Playback released");
        }
    }

    // ---- state machine ----

    pub fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            info!("Connection status: {:?} -> {:?}", self.status, status);
            self.status = status;
            self.emit(SessionEvent::StatusChanged(status));
        }
    }

    pub fn apply(&mut self, event: PhaseEvent) -> ConversationPhase {
        let next = transition(self.phase, event);
        if next != self.phase {
            info!("Phase: {:?} -> {:?} on {:?}", self.phase, next, event);
            let from = self.phase;
            self.phase = next;
            self.emit(SessionEvent::PhaseChanged { from, to: next });
        } else {
            debug!("Phase stays {:?} on {:?}", self.phase, event);
        }
        self.phase
    }

    /// Handshake finished on a freshly attached transport
    pub fn handshake_succeeded(&mut self, reconnect: bool) {
        self.resume_playback();
        self.set_status(ConnectionStatus::Connected);
        self.apply(if reconnect {
            PhaseEvent::ReconnectSucceeded
        } else {
            PhaseEvent::HandshakeSucceeded
        });
    }

    /// Lift a suppression left over from the previous link
    ///
    /// The `response.ready` it was waiting for died with that link, so only
    /// the turn filter guards against stale frames from here on.
    fn resume_playback(&mut self) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        if playback.is_suppressed() {
            self.expected_turn_seq = self
                .expected_turn_seq
                .max(self.turn_sequence.saturating_sub(1));
            playback.clear_suppression(self.expected_turn_seq);
        }
    }

    /// The link went away without the caller asking
    pub fn on_transport_closed(&mut self, reason: Option<String>) {
        if self.transport.take().is_none() || self.phase.is_terminal() {
            return;
        }

        warn!(
            "Transport closed: {}",
            reason.as_deref().unwrap_or("no reason given")
        );

        self.recording = false;
        self.vad.reset();
        self.set_status(ConnectionStatus::Disconnected);
        self.apply(PhaseEvent::TransportClosed {
            conversation_started: self.has_conversation_started,
        });
    }

    /// The peer ended the session; authoritative and never retried
    pub fn terminate_by_peer(&mut self, reason: Option<String>) {
        info!(
            "Session terminated by peer: {}",
            reason.as_deref().unwrap_or("no reason given")
        );

        self.shut_down(PhaseEvent::PeerTerminated);
        self.emit(SessionEvent::Terminated { reason });
    }

    /// Caller closed the session normally
    pub fn close_by_caller(&mut self) {
        self.shut_down(PhaseEvent::CallerClosed);
    }

    fn shut_down(&mut self, event: PhaseEvent) {
        self.recording = false;
        self.vad.reset();
        self.transport = None;
        self.release_playback();
        self.set_status(ConnectionStatus::Disconnected);
        self.apply(event);
    }

    // ---- inbound ----

    pub fn on_server_message(&mut self, message: ServerMessage, now: Instant) {
        if self.phase.is_terminal() {
            debug!("Ignoring {} after session end", message.message_type());
            return;
        }

        match message {
            ServerMessage::SessionCreated => debug!("Duplicate session.created ignored"),

            ServerMessage::ConversationItemCreated => debug!("Conversation item created"),

            ServerMessage::UserTranscription { transcript } => {
                self.mark_conversation_started();
                self.vad.server_speech_ended();
                info!("User: {}", transcript);
                self.push_transcript(Speaker::User, transcript.clone(), None, None);
                self.emit(SessionEvent::UserTranscript(transcript));
            }

            ServerMessage::UserSpeakingStarted => self.vad.server_speech_started(now),

            ServerMessage::AudioDelta { delta, turn_seq } => self.on_audio_delta(&delta, turn_seq),

            ServerMessage::AudioDone => debug!("AI audio complete"),

            ServerMessage::AiTranscriptionDelta { text } => {
                self.pending_ai_text.push_str(&text);
                self.emit(SessionEvent::AiTranscriptDelta(text));
            }

            ServerMessage::AiTranscriptionDone {
                text,
                emotion,
                emotion_reason,
            } => {
                self.mark_conversation_started();
                let pending = std::mem::take(&mut self.pending_ai_text);
                let text = if text.is_empty() { pending } else { text };

                info!("AI: {} (emotion: {:?})", text, emotion);
                self.push_transcript(Speaker::Ai, text, emotion, emotion_reason);
                if let Some(segment) = self.transcript.last() {
                    let view = TranscriptSegmentView::from(segment);
                    self.emit(SessionEvent::AiTranscriptDone(view));
                }
            }

            ServerMessage::ResponseDone => {
                self.mark_conversation_started();
                self.emit(SessionEvent::ResponseDone);
            }

            ServerMessage::ResponseInterrupted => {
                debug!("Peer acknowledged interruption");
                self.emit(SessionEvent::ResponseInterrupted);
            }

            ServerMessage::ResponseReady { turn_seq } => self.on_response_ready(turn_seq),

            ServerMessage::SessionWarning { message, time_left } => {
                warn!("Session warning: {}", message);
                self.emit(SessionEvent::Warning {
                    message,
                    time_left_secs: time_left,
                });
            }

            ServerMessage::SessionReconnecting {
                attempt,
                max_attempts,
            } => {
                warn!("Peer reconnecting upstream ({}/{})", attempt, max_attempts);
                self.emit(SessionEvent::Reconnecting {
                    attempt,
                    max_attempts,
                });
            }

            ServerMessage::SessionReconnected => {
                info!("Peer reconnected upstream");
                self.emit(SessionEvent::Reconnected);
            }

            ServerMessage::SessionTerminated { reason } => self.terminate_by_peer(reason),

            ServerMessage::Error { error } => {
                let text = error_text(&error);
                error!("Peer error: {}", text);
                self.emit(SessionEvent::Error(text));
            }

            ServerMessage::Unknown => {}
        }
    }

    fn on_audio_delta(&mut self, delta: &str, turn_seq: Option<u64>) {
        self.frames_received += 1;

        let frame = match codec::decode_frame(delta, turn_seq) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping undecodable audio: {}", e);
                self.frames_dropped += 1;
                return;
            }
        };

        let Some(playback) = self.playback.as_mut() else {
            debug!("No output device, dropping AI audio");
            self.frames_dropped += 1;
            return;
        };

        match playback.enqueue(frame) {
            EnqueueOutcome::Scheduled(_) => self.mark_conversation_started(),
            EnqueueOutcome::Suppressed | EnqueueOutcome::Stale | EnqueueOutcome::Empty => {
                self.frames_dropped += 1;
            }
        }
    }

    /// Peer retired the cancelled turn
    fn on_response_ready(&mut self, turn_seq: Option<u64>) {
        let confirmed = turn_seq.unwrap_or(self.turn_sequence);
        self.turn_sequence = self.turn_sequence.max(confirmed);
        self.expected_turn_seq = self.expected_turn_seq.max(confirmed.saturating_sub(1));

        if let Some(playback) = self.playback.as_mut() {
            playback.clear_suppression(self.expected_turn_seq);
        }

        info!(
            "Response ready for turn {}, expecting turns after {}",
            confirmed, self.expected_turn_seq
        );
        self.emit(SessionEvent::ResponseReady {
            expected_turn_seq: self.expected_turn_seq,
        });
    }

    // ---- capture side ----

    /// One captured frame: stream it while recording and run it through VAD
    pub fn on_capture_frame(&mut self, frame: AudioFrame, now: Instant) {
        if self.phase.is_terminal() {
            return;
        }

        if self.recording {
            if let Some(transport) = &self.transport {
                match codec::encode_frame(&frame) {
                    Ok(audio) => match transport.send(ClientMessage::InputAudioAppend { audio }) {
                        Ok(()) => self.frames_sent += 1,
                        Err(e) => debug!("Captured frame not sent: {}", e),
                    },
                    Err(e) => warn!("Dropping captured frame: {}", e),
                }
            }
        }

        let rendering = self.is_rendering();
        if let VadDecision::BargeIn(source) = self.vad.observe(&frame.to_f32(), now, rendering) {
            self.barge_in(source);
        }

        self.tick(now);
    }

    /// Check the pending server VAD signal
    pub fn tick(&mut self, now: Instant) {
        if self.phase.is_terminal() || !self.vad.server_pending() {
            return;
        }

        let rendering = self.is_rendering();
        if let VadDecision::BargeIn(source) = self.vad.poll_server(now, rendering) {
            self.barge_in(source);
        }
    }

    // ---- caller actions ----

    pub fn begin_recording(&mut self) -> VoiceResult<()> {
        self.ensure_connected()?;

        if self.recording {
            return Ok(());
        }

        self.vad.reset();
        if self.is_rendering() {
            self.barge_in(BargeInSource::Recording);
        }

        self.recording = true;
        info!("Recording started");
        Ok(())
    }

    /// Commit the recorded turn and ask for a reply
    pub fn end_recording(&mut self) -> VoiceResult<()> {
        if !self.recording {
            return Ok(());
        }

        self.recording = false;
        self.vad.reset();
        info!("Recording stopped, committing turn");

        self.send(ClientMessage::InputAudioCommit)?;
        self.send(ClientMessage::audio_response())
    }

    /// Drop the recording flag without committing anything
    pub fn cancel_recording(&mut self) {
        self.recording = false;
    }

    pub fn send_text(&mut self, text: &str) -> VoiceResult<()> {
        self.ensure_connected()?;

        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        if self.is_rendering() {
            self.barge_in(BargeInSource::TextInput);
        }

        self.send(ClientMessage::user_text(text))?;
        self.send(ClientMessage::audio_response())?;
        self.push_transcript(Speaker::User, text.to_string(), None, None);
        Ok(())
    }

    /// Barge in if AI audio is playing; returns whether it did
    pub fn interrupt(&mut self) -> bool {
        if !self.is_rendering() {
            return false;
        }
        self.barge_in(BargeInSource::Manual);
        true
    }

    /// Silence local playback, advance the turn and cancel the response
    pub fn barge_in(&mut self, source: BargeInSource) {
        let flushed = self.playback.as_mut().map(|p| p.flush()).unwrap_or(0);

        self.turn_sequence += 1;
        self.barge_ins += 1;
        self.vad.mark_triggered();

        info!(
            "Barge-in ({:?}): {} segments silenced, turn {}",
            source, flushed, self.turn_sequence
        );

        if let Err(e) = self.send(ClientMessage::ResponseCancel) {
            warn!("Cancel not delivered: {}", e);
        }

        self.emit(SessionEvent::BargeIn {
            turn_sequence: self.turn_sequence,
            source,
        });
    }

    pub fn send(&self, message: ClientMessage) -> VoiceResult<()> {
        let transport = self.transport.as_ref().ok_or(VoiceError::NotConnected)?;
        debug!("Sending {}", message.message_type());
        transport.send(message)
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn ensure_connected(&self) -> VoiceResult<()> {
        if self.phase.is_terminal() {
            return Err(VoiceError::SessionEnded);
        }
        if self.transport.is_none() {
            return Err(VoiceError::NotConnected);
        }
        Ok(())
    }

    fn mark_conversation_started(&mut self) {
        if !self.has_conversation_started {
            debug!("First turn exchanged");
            self.has_conversation_started = true;
        }
    }

    fn push_transcript(
        &mut self,
        speaker: Speaker,
        text: String,
        emotion: Option<String>,
        emotion_reason: Option<String>,
    ) {
        self.transcript.push(TranscriptSegment {
            speaker,
            text,
            emotion,
            emotion_reason,
            timestamp: Utc::now(),
        });
    }

    // ---- accessors ----

    pub fn is_rendering(&mut self) -> bool {
        self.playback
            .as_mut()
            .map(|p| p.is_rendering())
            .unwrap_or(false)
    }

    pub fn phase(&self) -> ConversationPhase {
        self.phase
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn turn_sequence(&self) -> u64 {
        self.turn_sequence
    }

    pub fn expected_turn_seq(&self) -> u64 {
        self.expected_turn_seq
    }

    pub fn is_suppressed(&self) -> bool {
        self.playback
            .as_ref()
            .map(|p| p.is_suppressed())
            .unwrap_or(false)
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn has_conversation_started(&self) -> bool {
        self.has_conversation_started
    }

    pub fn transcript(&self) -> &[TranscriptSegment] {
        &self.transcript
    }

    pub fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);

        SessionStats {
            session_id: self.session_id.clone(),
            phase: self.phase,
            status: self.status,
            turn_sequence: self.turn_sequence,
            expected_turn_seq: self.expected_turn_seq,
            suppressed: self.is_suppressed(),
            frames_sent: self.frames_sent,
            frames_received: self.frames_received,
            frames_dropped: self.frames_dropped,
            barge_ins: self.barge_ins,
            transcript_segments_count: self.transcript.len(),
            has_conversation_started: self.has_conversation_started,
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        }
    }
}
