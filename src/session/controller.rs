use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::events::SessionEvent;
use super::phase::{ConnectionStatus, ConversationPhase};
use super::state::SessionCore;
use super::stats::{SessionStats, TranscriptSegment};
use crate::audio::{AudioDevices, AudioOutput, CapturePipeline, PlaybackScheduler};
use crate::error::{VoiceError, VoiceResult};
use crate::transport::messages::error_text;
use crate::transport::{
    ClientMessage, CloseHandle, ConnectParams, Connector, ServerMessage, TokenProvider,
    TransportEvent, TransportLink,
};

/// How often a pending server VAD signal is re-checked
const VAD_TICK: Duration = Duration::from_millis(50);

const EVENT_CAPACITY: usize = 256;

/// A duplex voice conversation with the remote AI peer
///
/// Owns the transport link, the capture pipeline and the output device for
/// one conversation attempt. All session state sits in a single
/// [`SessionCore`] that the inbound, capture and tick tasks lock in turn.
pub struct SessionController {
    config: SessionConfig,
    core: Arc<Mutex<SessionCore>>,
    events: broadcast::Sender<SessionEvent>,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    devices: Arc<dyn AudioDevices>,
    closer: Option<CloseHandle>,
    inbound_task: Option<JoinHandle<()>>,
    tick_task: Option<JoinHandle<()>>,
    capture: Option<CapturePipeline>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        info!(
            "Creating voice session for conversation {}",
            config.conversation_id
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let core = SessionCore::new(&config, events.clone());

        Self {
            config,
            core: Arc::new(Mutex::new(core)),
            events,
            connector,
            tokens,
            devices,
            closer: None,
            inbound_task: None,
            tick_task: None,
            capture: None,
        }
    }

    /// Open the connection and wait for the handshake
    pub async fn connect(&mut self) -> VoiceResult<()> {
        {
            let core = self.core.lock();
            if core.phase().is_terminal() {
                return Err(VoiceError::SessionEnded);
            }
            if core.has_transport() {
                warn!("Session already connected");
                return Ok(());
            }
        }

        self.establish(false).await
    }

    /// Bounded reconnect after the link dropped
    ///
    /// Emits `Reconnecting` before every round. When every round fails the
    /// status becomes `Error` and the phase is left as it was.
    pub async fn reconnect(&mut self) -> VoiceResult<()> {
        {
            let core = self.core.lock();
            if core.phase().is_terminal() {
                return Err(VoiceError::SessionEnded);
            }
            if core.has_transport() {
                debug!("Reconnect requested while connected");
                return Ok(());
            }
        }

        let max_attempts = self.config.max_reconnect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            info!("Reconnecting (attempt {}/{})", attempt, max_attempts);
            self.core.lock().emit(SessionEvent::Reconnecting {
                attempt,
                max_attempts,
            });

            match self.establish(true).await {
                Ok(()) => {
                    info!("Reconnected on attempt {}", attempt);
                    self.core.lock().emit(SessionEvent::Reconnected);
                    return Ok(());
                }
                Err(e @ VoiceError::SessionTerminatedByPeer(_)) => return Err(e),
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.reconnect_backoff).await;
                    }
                }
            }
        }

        error!("Giving up after {} reconnect attempts", max_attempts);
        self.core.lock().set_status(ConnectionStatus::Error);

        Err(last_error
            .unwrap_or_else(|| VoiceError::Transport("Reconnect failed".to_string())))
    }

    async fn establish(&mut self, reconnect: bool) -> VoiceResult<()> {
        self.stop_link_tasks();
        self.core.lock().set_status(ConnectionStatus::Connecting);

        let link = match self.open_link().await {
            Ok(link) => link,
            Err(VoiceError::SessionTerminatedByPeer(reason)) => {
                self.core.lock().terminate_by_peer(Some(reason.clone()));
                return Err(VoiceError::SessionTerminatedByPeer(reason));
            }
            Err(e) => {
                let mut core = self.core.lock();
                // A failed reconnect round only becomes an error once all rounds are spent
                if !reconnect {
                    core.set_status(ConnectionStatus::Error);
                }
                core.emit(SessionEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        // Output survives transport drops; only the first connect opens it
        let needs_output = !self.core.lock().has_playback();
        let output = if needs_output {
            self.open_output().await
        } else {
            None
        };

        let TransportLink {
            sender,
            events,
            closer,
        } = link;

        {
            let mut core = self.core.lock();
            if let Some(output) = output {
                core.attach_playback(PlaybackScheduler::with_playback_rate(
                    output,
                    self.config.playback_rate,
                ));
            }
            core.attach_transport(sender);
            if let Err(e) = core.send(ClientMessage::ClientReady) {
                warn!("Failed to send client.ready: {}", e);
            }
            core.handshake_succeeded(reconnect);
        }

        self.closer = Some(closer);
        self.inbound_task = Some(spawn_inbound(Arc::clone(&self.core), events));
        self.tick_task = Some(spawn_tick(Arc::clone(&self.core)));

        Ok(())
    }

    async fn open_link(&self) -> VoiceResult<TransportLink> {
        let token_ms = self.config.token_timeout.as_millis() as u64;
        let token = timeout(self.config.token_timeout, self.tokens.fetch_token())
            .await
            .map_err(|_| VoiceError::Timeout(token_ms, "fetching the auth token"))??;

        let params = ConnectParams {
            url: self.config.server_url.clone(),
            conversation_id: self.config.conversation_id.clone(),
            scenario_id: self.config.scenario_id.clone(),
            persona_id: self.config.persona_id.clone(),
            token,
        };

        let handshake_ms = self.config.handshake_timeout.as_millis() as u64;
        timeout(
            self.config.handshake_timeout,
            handshake(self.connector.as_ref(), &params),
        )
        .await
        .map_err(|_| VoiceError::Timeout(handshake_ms, "waiting for session.created"))?
    }

    async fn open_output(&self) -> Option<Box<dyn AudioOutput>> {
        match self.devices.open_output().await {
            Ok(output) => Some(output),
            Err(e) => {
                // Text still works without speakers
                error!("Output unavailable, AI audio will be dropped: {}", e);
                self.core.lock().emit(SessionEvent::Error(e.to_string()));
                None
            }
        }
    }

    /// Start streaming microphone audio to the peer
    ///
    /// Barges in first if AI audio is playing.
    pub async fn start_recording(&mut self) -> VoiceResult<()> {
        {
            let core = self.core.lock();
            if core.phase().is_terminal() {
                return Err(VoiceError::SessionEnded);
            }
            if !core.has_transport() {
                return Err(VoiceError::NotConnected);
            }
        }

        if self.capture.is_some() {
            return self.core.lock().begin_recording();
        }

        let backend = match self.devices.open_capture().await {
            Ok(backend) => backend,
            Err(e) => {
                error!("Capture unavailable: {}", e);
                self.core.lock().emit(SessionEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        self.core.lock().begin_recording()?;

        let mut pipeline = CapturePipeline::new(backend);
        let core = Arc::clone(&self.core);
        let started = pipeline
            .start(move |frame| core.lock().on_capture_frame(frame, Instant::now()))
            .await;

        if let Err(e) = started {
            error!("Capture failed to start: {}", e);
            let mut core = self.core.lock();
            core.cancel_recording();
            core.emit(SessionEvent::Error(e.to_string()));
            return Err(e);
        }

        self.capture = Some(pipeline);
        Ok(())
    }

    /// Stop capture, commit the turn and request a reply
    pub async fn stop_recording(&mut self) -> VoiceResult<()> {
        self.stop_capture().await;
        self.core.lock().end_recording()
    }

    /// Send a typed user turn
    pub fn send_text(&self, text: &str) -> VoiceResult<()> {
        self.core.lock().send_text(text)
    }

    /// Cut off the AI if it is speaking; returns whether anything was cut
    pub fn interrupt(&self) -> bool {
        self.core.lock().interrupt()
    }

    /// Close the session for good and release every device
    pub async fn disconnect(&mut self) {
        info!("Disconnecting voice session");

        self.stop_capture().await;
        self.core.lock().close_by_caller();
        self.stop_link_tasks();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        self.core.lock().stats()
    }

    pub fn phase(&self) -> ConversationPhase {
        self.core.lock().phase()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.core.lock().status()
    }

    pub fn turn_sequence(&self) -> u64 {
        self.core.lock().turn_sequence()
    }

    pub fn is_recording(&self) -> bool {
        self.core.lock().is_recording()
    }

    pub fn transcript(&self) -> Vec<TranscriptSegment> {
        self.core.lock().transcript().to_vec()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    async fn stop_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop().await {
                warn!("Capture did not stop cleanly: {}", e);
            }
        }
    }

    fn stop_link_tasks(&mut self) {
        if let Some(task) = self.inbound_task.take() {
            task.abort();
        }
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
        self.closer = None;
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop_link_tasks();
    }
}

/// Connect and wait for `session.created`
async fn handshake(connector: &dyn Connector, params: &ConnectParams) -> VoiceResult<TransportLink> {
    let mut link = connector.connect(params).await?;

    loop {
        match link.events.recv().await {
            Some(TransportEvent::Message(ServerMessage::SessionCreated)) => {
                info!("Session created");
                return Ok(link);
            }
            Some(TransportEvent::Message(ServerMessage::SessionTerminated { reason })) => {
                return Err(VoiceError::SessionTerminatedByPeer(
                    reason.unwrap_or_else(|| "terminated during handshake".to_string()),
                ));
            }
            Some(TransportEvent::Message(ServerMessage::Error { error })) => {
                return Err(VoiceError::Transport(error_text(&error)));
            }
            Some(TransportEvent::Message(other)) => {
                debug!("Ignoring {} before session.created", other.message_type());
            }
            Some(TransportEvent::Closed { reason }) => {
                return Err(VoiceError::Transport(format!(
                    "Closed during handshake: {}",
                    reason.as_deref().unwrap_or("no reason given")
                )));
            }
            None => {
                return Err(VoiceError::Transport("Closed during handshake".to_string()));
            }
        }
    }
}

fn spawn_inbound(
    core: Arc<Mutex<SessionCore>>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let mut core = core.lock();
            match event {
                TransportEvent::Message(message) => {
                    core.on_server_message(message, Instant::now());
                    if core.phase().is_terminal() {
                        return;
                    }
                }
                TransportEvent::Closed { reason } => {
                    core.on_transport_closed(reason);
                    return;
                }
            }
        }

        core.lock().on_transport_closed(None);
    })
}

fn spawn_tick(core: Arc<Mutex<SessionCore>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(VAD_TICK);
        loop {
            ticker.tick().await;
            let mut core = core.lock();
            if core.phase().is_terminal() || !core.has_transport() {
                return;
            }
            core.tick(Instant::now());
        }
    })
}
