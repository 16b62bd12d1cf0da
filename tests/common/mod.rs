// Shared fixtures: an in-memory connector, scriptable devices and event helpers

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use parking_lot::Mutex;
use roleplay_voice::audio::{
    AudioDevices, AudioFrame, AudioOutput, CaptureBackend, VirtualOutput, VirtualOutputHandle,
    OUTPUT_SAMPLE_RATE,
};
use roleplay_voice::audio::codec;
use roleplay_voice::error::{VoiceError, VoiceResult};
use roleplay_voice::session::{SessionConfig, SessionController, SessionEvent};
use roleplay_voice::transport::{
    ConnectParams, Connector, LoopbackPeer, ServerMessage, StaticToken, TransportLink,
};
use tokio::sync::{broadcast, mpsc};

pub const WAIT: Duration = Duration::from_secs(2);

/// Connector that hands every opened link's far end to the test
pub struct LoopbackConnector {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    failures: AtomicU32,
    silent: AtomicBool,
    params: Mutex<Vec<ConnectParams>>,
}

impl LoopbackConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers: tx,
            failures: AtomicU32::new(0),
            silent: AtomicBool::new(false),
            params: Mutex::new(Vec::new()),
        });
        (connector, rx)
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Accept connections but never send `session.created`
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.params.lock().len()
    }

    pub fn last_params(&self) -> Option<ConnectParams> {
        self.params.lock().last().cloned()
    }
}

#[async_trait::async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, params: &ConnectParams) -> VoiceResult<TransportLink> {
        self.params.lock().push(params.clone());

        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(VoiceError::Transport("Connection refused".to_string()));
        }

        let (link, peer) = TransportLink::loopback();
        if !self.silent.load(Ordering::SeqCst) {
            peer.deliver(ServerMessage::SessionCreated);
        }
        let _ = self.peers.send(peer);
        Ok(link)
    }
}

/// Capture backend fed from a channel the test holds
pub struct ChannelCapture {
    frames: Option<mpsc::Receiver<AudioFrame>>,
    capturing: bool,
}

#[async_trait::async_trait]
impl CaptureBackend for ChannelCapture {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<AudioFrame>> {
        let frames = self
            .frames
            .take()
            .ok_or_else(|| VoiceError::DeviceUnavailable("already started".to_string()))?;
        self.capturing = true;
        Ok(frames)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Manual-clock output plus a capture channel per session
#[derive(Default)]
pub struct TestDevices {
    output: Mutex<Option<VirtualOutputHandle>>,
    capture: Mutex<Option<mpsc::Sender<AudioFrame>>>,
    deny_microphone: AtomicBool,
}

impl TestDevices {
    pub fn output(&self) -> VirtualOutputHandle {
        self.output.lock().clone().expect("output opened")
    }

    pub fn microphone(&self) -> mpsc::Sender<AudioFrame> {
        self.capture.lock().clone().expect("capture opened")
    }

    pub fn deny_microphone(&self) {
        self.deny_microphone.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl AudioDevices for TestDevices {
    async fn open_capture(&self) -> VoiceResult<Box<dyn CaptureBackend>> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(VoiceError::DeviceUnavailable("Permission denied".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        *self.capture.lock() = Some(tx);
        Ok(Box::new(ChannelCapture {
            frames: Some(rx),
            capturing: false,
        }))
    }

    async fn open_output(&self) -> VoiceResult<Box<dyn AudioOutput>> {
        let (output, handle) = VirtualOutput::manual(OUTPUT_SAMPLE_RATE);
        *self.output.lock() = Some(handle);
        Ok(Box::new(output))
    }
}

pub struct Harness {
    pub session: SessionController,
    pub events: broadcast::Receiver<SessionEvent>,
    pub connector: Arc<LoopbackConnector>,
    pub peers: mpsc::UnboundedReceiver<LoopbackPeer>,
    pub devices: Arc<TestDevices>,
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        conversation_id: "conv-42".to_string(),
        scenario_id: "negotiation".to_string(),
        persona_id: "skeptical-buyer".to_string(),
        server_url: "ws://127.0.0.1:9/api/voice".to_string(),
        reconnect_backoff: Duration::from_millis(10),
        handshake_timeout: Duration::from_millis(300),
        ..SessionConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: SessionConfig) -> Harness {
    let (connector, peers) = LoopbackConnector::new();
    let devices = Arc::new(TestDevices::default());
    let session = SessionController::new(
        config,
        connector.clone(),
        Arc::new(StaticToken::new("test-token")),
        devices.clone(),
    );
    let events = session.subscribe();

    Harness {
        session,
        events,
        connector,
        peers,
        devices,
    }
}

impl Harness {
    /// Connect and return the far end of the new link
    pub async fn connect(&mut self) -> LoopbackPeer {
        self.session.connect().await.expect("connect");
        self.next_peer().await
    }

    pub async fn next_peer(&mut self) -> LoopbackPeer {
        tokio::time::timeout(WAIT, self.peers.recv())
            .await
            .expect("peer in time")
            .expect("connector alive")
    }

    /// Wait until every message delivered so far has been applied
    pub async fn sync(&mut self, peer: &LoopbackPeer) {
        peer.deliver(ServerMessage::SessionWarning {
            message: "sync".to_string(),
            time_left: None,
        });
        self.wait_for(|e| matches!(e, SessionEvent::Warning { message, .. } if message == "sync"))
            .await;
    }

    pub async fn wait_for<F>(&mut self, predicate: F) -> SessionEvent
    where
        F: Fn(&SessionEvent) -> bool,
    {
        wait_for(&mut self.events, predicate).await
    }
}

pub async fn wait_for<F>(events: &mut broadcast::Receiver<SessionEvent>, predicate: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("event in time")
}

/// Poll `condition` until it holds
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition in time")
}

/// An `audio.delta` carrying 100ms of AI speech
pub fn ai_audio(turn_seq: Option<u64>) -> ServerMessage {
    let bytes = codec::pcm16_to_bytes(&[3000i16; 2400]);
    ServerMessage::AudioDelta {
        delta: base64::engine::general_purpose::STANDARD.encode(bytes),
        turn_seq,
    }
}

pub fn mic_frame(level: f32) -> AudioFrame {
    let samples: Vec<f32> = (0..1024)
        .map(|i| if i % 2 == 0 { level } else { -level })
        .collect();
    AudioFrame::from_f32(&samples, 48000, roleplay_voice::audio::Direction::Outbound)
}
