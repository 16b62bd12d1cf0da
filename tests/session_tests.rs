// Integration tests for the voice session controller
//
// These drive a full SessionController over an in-memory link with a
// manual-clock output, so every assertion is about observable behavior:
// phases, turn sequence, what reached the speaker, what went on the wire.

mod common;

use std::time::Duration;

use anyhow::Result;
use common::{ai_audio, eventually, harness, harness_with, mic_frame, test_config};
use roleplay_voice::error::VoiceError;
use roleplay_voice::session::{ConnectionStatus, ConversationPhase, SessionEvent};
use roleplay_voice::transport::{ClientMessage, ServerMessage};
use roleplay_voice::vad::BargeInSource;

#[tokio::test]
async fn test_handshake_moves_idle_to_active() -> Result<()> {
    let mut h = harness();
    assert_eq!(h.session.phase(), ConversationPhase::Idle);
    assert_eq!(h.session.status(), ConnectionStatus::Disconnected);

    let mut peer = h.connect().await;

    assert_eq!(h.session.phase(), ConversationPhase::Active);
    assert_eq!(h.session.status(), ConnectionStatus::Connected);
    assert_eq!(h.session.turn_sequence(), 1);
    assert_eq!(peer.sent(), vec![ClientMessage::ClientReady]);

    let params = h.connector.last_params().expect("connected once");
    assert_eq!(params.conversation_id, "conv-42");
    assert_eq!(params.scenario_id, "negotiation");
    assert_eq!(params.persona_id, "skeptical-buyer");
    assert_eq!(params.token, "test-token");

    Ok(())
}

#[tokio::test]
async fn test_barge_in_then_turn_ready_scenario() -> Result<()> {
    let mut h = harness();
    let mut peer = h.connect().await;
    let output = h.devices.output();

    // Five frames of the first AI turn all render
    for _ in 0..5 {
        peer.deliver(ai_audio(Some(1)));
    }
    h.sync(&peer).await;
    assert_eq!(output.scheduled_count(), 5);
    assert_eq!(output.audible_segments(), 5);

    // Barge-in: immediate silence, next turn, cancel on the wire
    assert!(h.session.interrupt());
    assert_eq!(h.session.turn_sequence(), 2);
    assert_eq!(output.audible_segments(), 0);
    assert!(peer.sent().contains(&ClientMessage::ResponseCancel));

    // In-flight frames of the cancelled turn never play
    for _ in 0..3 {
        peer.deliver(ai_audio(Some(1)));
    }
    h.sync(&peer).await;
    assert_eq!(output.scheduled_count(), 5);
    assert_eq!(h.session.stats().frames_dropped, 3);

    peer.deliver(ServerMessage::ResponseReady { turn_seq: Some(2) });
    let ready = h
        .wait_for(|e| matches!(e, SessionEvent::ResponseReady { .. }))
        .await;
    assert_eq!(ready, SessionEvent::ResponseReady { expected_turn_seq: 1 });

    let stats = h.session.stats();
    assert_eq!(stats.expected_turn_seq, 1);
    assert!(!stats.suppressed);

    // The new turn plays, stragglers from the old one still do not
    peer.deliver(ai_audio(Some(2)));
    peer.deliver(ai_audio(Some(1)));
    peer.deliver(ai_audio(Some(2)));
    h.sync(&peer).await;
    assert_eq!(output.scheduled_count(), 7);
    assert_eq!(output.audible_segments(), 2);

    Ok(())
}

#[tokio::test]
async fn test_flush_leaves_nothing_audible() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;
    let output = h.devices.output();

    for _ in 0..10 {
        peer.deliver(ai_audio(None));
    }
    h.sync(&peer).await;

    // Partway through playback
    output.advance(0.25);
    assert!(output.audible_segments() > 0);

    assert!(h.session.interrupt());
    assert_eq!(output.audible_segments(), 0);

    // Time moving on does not bring anything back
    output.advance(5.0);
    assert_eq!(output.audible_segments(), 0);

    Ok(())
}

#[tokio::test]
async fn test_segments_never_overlap() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;
    let output = h.devices.output();

    for i in 0..6 {
        peer.deliver(ai_audio(Some(1)));
        if i == 2 {
            h.sync(&peer).await;
            output.advance(0.05);
        }
    }
    h.sync(&peer).await;

    let timeline = output.timeline();
    assert_eq!(timeline.len(), 6);
    for pair in timeline.windows(2) {
        let (start, duration) = pair[0];
        assert!(pair[1].0 >= start + duration - 1e-9, "{:?}", timeline);
    }

    Ok(())
}

#[tokio::test]
async fn test_turn_sequence_never_decreases() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;
    let mut last = h.session.turn_sequence();

    for turn in [1u64, 2, 3] {
        peer.deliver(ai_audio(Some(turn)));
        h.sync(&peer).await;
        h.session.interrupt();
        assert!(h.session.turn_sequence() >= last);
        last = h.session.turn_sequence();

        // A late, lower confirmation must not pull the counter back
        peer.deliver(ServerMessage::ResponseReady { turn_seq: Some(1) });
        h.sync(&peer).await;
        assert!(h.session.turn_sequence() >= last);
        last = h.session.turn_sequence();
    }

    assert_eq!(h.session.stats().barge_ins, 3);
    Ok(())
}

#[tokio::test]
async fn test_close_before_any_turn_returns_to_idle() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;

    peer.close(Some("server restart"));
    h.wait_for(|e| {
        matches!(
            e,
            SessionEvent::PhaseChanged {
                to: ConversationPhase::Idle,
                ..
            }
        )
    })
    .await;

    assert_eq!(h.session.phase(), ConversationPhase::Idle);
    assert_eq!(h.session.status(), ConnectionStatus::Disconnected);
    assert!(!h.session.stats().has_conversation_started);

    Ok(())
}

#[tokio::test]
async fn test_close_mid_conversation_then_reconnect() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;

    peer.deliver(ServerMessage::UserTranscription {
        transcript: "I want a discount".to_string(),
    });
    peer.deliver(ServerMessage::ResponseDone);
    h.wait_for(|e| matches!(e, SessionEvent::ResponseDone)).await;

    peer.close(None);
    h.wait_for(|e| {
        matches!(
            e,
            SessionEvent::PhaseChanged {
                to: ConversationPhase::Interrupted,
                ..
            }
        )
    })
    .await;
    assert_eq!(h.session.phase(), ConversationPhase::Interrupted);

    h.session.reconnect().await?;
    let mut second = h.next_peer().await;

    assert_eq!(h.session.phase(), ConversationPhase::Active);
    assert_eq!(h.session.status(), ConnectionStatus::Connected);
    assert!(h.session.stats().has_conversation_started);
    assert_eq!(second.sent(), vec![ClientMessage::ClientReady]);
    assert_eq!(h.connector.connect_count(), 2);

    h.wait_for(|e| {
        matches!(
            e,
            SessionEvent::Reconnecting {
                attempt: 1,
                max_attempts: 3
            }
        )
    })
    .await;

    Ok(())
}

#[tokio::test]
async fn test_reconnect_exhaustion_keeps_phase() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;

    peer.deliver(ServerMessage::ResponseDone);
    h.sync(&peer).await;
    peer.close(None);
    h.wait_for(|e| {
        matches!(
            e,
            SessionEvent::PhaseChanged {
                to: ConversationPhase::Interrupted,
                ..
            }
        )
    })
    .await;

    h.connector.fail_next(10);
    let result = h.session.reconnect().await;

    assert!(matches!(result, Err(VoiceError::Transport(_))));
    assert_eq!(h.session.status(), ConnectionStatus::Error);
    assert_eq!(h.session.phase(), ConversationPhase::Interrupted);
    // One initial connect plus three rounds
    assert_eq!(h.connector.connect_count(), 4);

    Ok(())
}

#[tokio::test]
async fn test_reconnect_after_barge_in_plays_new_turn() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;
    let output = h.devices.output();

    peer.deliver(ai_audio(Some(1)));
    h.sync(&peer).await;
    assert!(h.session.interrupt());
    assert!(h.session.stats().suppressed);

    // The link drops before the peer confirms the new turn
    peer.close(None);
    h.wait_for(|e| {
        matches!(
            e,
            SessionEvent::PhaseChanged {
                to: ConversationPhase::Interrupted,
                ..
            }
        )
    })
    .await;

    h.session.reconnect().await?;
    let second = h.next_peer().await;
    assert_eq!(h.session.phase(), ConversationPhase::Active);

    let stats = h.session.stats();
    assert!(!stats.suppressed);
    assert_eq!(stats.turn_sequence, 2);
    assert_eq!(stats.expected_turn_seq, 1);

    // The cancelled turn stays silent, the new one and untagged audio play
    second.deliver(ai_audio(Some(1)));
    second.deliver(ai_audio(Some(2)));
    second.deliver(ai_audio(None));
    h.sync(&second).await;

    assert_eq!(output.scheduled_count(), 3);
    assert_eq!(h.session.stats().frames_dropped, 1);

    Ok(())
}

#[tokio::test]
async fn test_reconnect_retry_never_reports_error_status() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;

    peer.deliver(ServerMessage::ResponseDone);
    h.sync(&peer).await;
    peer.close(None);
    h.wait_for(|e| {
        matches!(
            e,
            SessionEvent::PhaseChanged {
                to: ConversationPhase::Interrupted,
                ..
            }
        )
    })
    .await;

    h.connector.fail_next(1);
    h.session.reconnect().await?;
    let _second = h.next_peer().await;

    let mut statuses = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        if let SessionEvent::StatusChanged(status) = event {
            statuses.push(status);
        }
    }

    assert!(!statuses.contains(&ConnectionStatus::Error), "{:?}", statuses);
    assert!(statuses.contains(&ConnectionStatus::Connecting));
    assert_eq!(statuses.last(), Some(&ConnectionStatus::Connected));
    assert_eq!(h.session.status(), ConnectionStatus::Connected);
    // One initial connect, one refused round, one that succeeds
    assert_eq!(h.connector.connect_count(), 3);

    Ok(())
}

#[tokio::test]
async fn test_peer_termination_is_final() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;

    peer.deliver(ai_audio(Some(1)));
    peer.deliver(ServerMessage::SessionTerminated {
        reason: Some("time limit reached".to_string()),
    });
    let event = h
        .wait_for(|e| matches!(e, SessionEvent::Terminated { .. }))
        .await;
    assert_eq!(
        event,
        SessionEvent::Terminated {
            reason: Some("time limit reached".to_string())
        }
    );

    assert_eq!(h.session.phase(), ConversationPhase::Ended);
    assert_eq!(h.devices.output().audible_segments(), 0);

    assert!(matches!(h.session.connect().await, Err(VoiceError::SessionEnded)));
    assert!(matches!(h.session.reconnect().await, Err(VoiceError::SessionEnded)));
    assert!(matches!(h.session.send_text("still there?"), Err(VoiceError::SessionEnded)));
    assert_eq!(h.connector.connect_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_caller_disconnect_ends_session() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;

    h.session.disconnect().await;

    assert_eq!(h.session.phase(), ConversationPhase::Ended);
    assert_eq!(h.session.status(), ConnectionStatus::Disconnected);
    assert!(peer.closed.await.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_handshake_timeout_leaves_idle() -> Result<()> {
    let mut config = test_config();
    config.handshake_timeout = Duration::from_millis(100);
    let mut h = harness_with(config);
    h.connector.set_silent(true);

    let result = h.session.connect().await;

    assert!(matches!(result, Err(VoiceError::Timeout(100, _))));
    assert_eq!(h.session.phase(), ConversationPhase::Idle);
    assert_eq!(h.session.status(), ConnectionStatus::Error);

    Ok(())
}

#[tokio::test]
async fn test_unknown_and_malformed_audio_do_not_end_session() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;

    peer.deliver(ServerMessage::Unknown);
    peer.deliver(ServerMessage::AudioDelta {
        delta: "***".to_string(),
        turn_seq: Some(1),
    });
    h.sync(&peer).await;

    assert_eq!(h.session.phase(), ConversationPhase::Active);
    let stats = h.session.stats();
    assert_eq!(stats.frames_received, 1);
    assert_eq!(stats.frames_dropped, 1);

    Ok(())
}

#[tokio::test]
async fn test_recording_streams_and_commits() -> Result<()> {
    let mut h = harness();
    let mut peer = h.connect().await;
    peer.sent();

    h.session.start_recording().await?;
    assert!(h.session.is_recording());

    let mic = h.devices.microphone();
    for _ in 0..3 {
        mic.send(mic_frame(0.01)).await?;
    }
    let session = &h.session;
    eventually(|| session.stats().frames_sent == 3).await;

    h.session.stop_recording().await?;

    let sent = peer.sent();
    let appends = sent
        .iter()
        .filter(|m| matches!(m, ClientMessage::InputAudioAppend { .. }))
        .count();
    assert_eq!(appends, 3);
    assert_eq!(
        &sent[3..],
        &[ClientMessage::InputAudioCommit, ClientMessage::audio_response()]
    );
    assert!(!h.session.is_recording());

    Ok(())
}

#[tokio::test]
async fn test_recording_over_ai_speech_barges_in() -> Result<()> {
    let mut h = harness();
    let mut peer = h.connect().await;

    peer.deliver(ai_audio(Some(1)));
    h.sync(&peer).await;

    h.session.start_recording().await?;

    let event = h
        .wait_for(|e| matches!(e, SessionEvent::BargeIn { .. }))
        .await;
    assert_eq!(
        event,
        SessionEvent::BargeIn {
            turn_sequence: 2,
            source: BargeInSource::Recording
        }
    );
    assert_eq!(h.devices.output().audible_segments(), 0);
    assert!(peer.sent().contains(&ClientMessage::ResponseCancel));

    Ok(())
}

#[tokio::test]
async fn test_sustained_voice_over_ai_speech_barges_in() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;

    h.session.start_recording().await?;
    let mic = h.devices.microphone();

    peer.deliver(ai_audio(Some(1)));
    h.sync(&peer).await;

    // A short cough is not enough
    mic.send(mic_frame(0.4)).await?;
    mic.send(mic_frame(0.0)).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.session.turn_sequence(), 1);

    // Sustained speech is
    mic.send(mic_frame(0.4)).await?;
    tokio::time::sleep(Duration::from_millis(350)).await;
    mic.send(mic_frame(0.4)).await?;

    let event = h
        .wait_for(|e| matches!(e, SessionEvent::BargeIn { .. }))
        .await;
    assert_eq!(
        event,
        SessionEvent::BargeIn {
            turn_sequence: 2,
            source: BargeInSource::LocalEnergy
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_server_speech_signal_barges_in_after_gate() -> Result<()> {
    let mut config = test_config();
    config.vad.server_sustained_duration = Duration::from_millis(200);
    let mut h = harness_with(config);
    let peer = h.connect().await;

    peer.deliver(ai_audio(Some(1)));
    peer.deliver(ServerMessage::UserSpeakingStarted);
    h.sync(&peer).await;
    assert_eq!(h.session.turn_sequence(), 1);

    let event = h
        .wait_for(|e| matches!(e, SessionEvent::BargeIn { .. }))
        .await;
    assert_eq!(
        event,
        SessionEvent::BargeIn {
            turn_sequence: 2,
            source: BargeInSource::ServerVad
        }
    );

    Ok(())
}

#[tokio::test]
async fn test_microphone_denied_keeps_text_working() -> Result<()> {
    let mut h = harness();
    let mut peer = h.connect().await;
    peer.sent();
    h.devices.deny_microphone();

    let result = h.session.start_recording().await;
    assert!(matches!(result, Err(VoiceError::DeviceUnavailable(_))));
    h.wait_for(|e| matches!(e, SessionEvent::Error(_))).await;

    h.session.send_text("Can we talk price?")?;
    assert_eq!(
        peer.sent(),
        vec![
            ClientMessage::user_text("Can we talk price?"),
            ClientMessage::audio_response()
        ]
    );
    assert_eq!(h.session.phase(), ConversationPhase::Active);

    Ok(())
}

#[tokio::test]
async fn test_transcript_collects_both_speakers() -> Result<()> {
    let mut h = harness();
    let peer = h.connect().await;

    peer.deliver(ServerMessage::UserTranscription {
        transcript: "Hello there".to_string(),
    });
    peer.deliver(ServerMessage::AiTranscriptionDone {
        text: "What do you want?".to_string(),
        emotion: Some("irritated".to_string()),
        emotion_reason: Some("busy day".to_string()),
    });
    h.sync(&peer).await;

    let transcript = h.session.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].text, "Hello there");
    assert_eq!(transcript[1].emotion.as_deref(), Some("irritated"));
    assert_eq!(h.session.stats().transcript_segments_count, 2);

    Ok(())
}
