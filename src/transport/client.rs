use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use crate::error::{VoiceError, VoiceResult};

/// Where and as whom to open a conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    /// Base WebSocket URL of the voice endpoint
    pub url: String,
    pub conversation_id: String,
    pub scenario_id: String,
    pub persona_id: String,
    pub token: String,
}

impl ConnectParams {
    /// Endpoint URL with the session identifiers as query parameters
    pub fn to_url(&self) -> VoiceResult<url::Url> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| VoiceError::Config(format!("Invalid server URL '{}': {}", self.url, e)))?;

        url.query_pairs_mut()
            .append_pair("conversationId", &self.conversation_id)
            .append_pair("scenarioId", &self.scenario_id)
            .append_pair("personaId", &self.persona_id)
            .append_pair("token", &self.token);

        Ok(url)
    }
}

/// What the transport reports upward
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(ServerMessage),
    /// Emitted once; nothing follows it
    Closed { reason: Option<String> },
}

/// Cloneable send half of an open link
#[derive(Debug, Clone)]
pub struct TransportSender {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl TransportSender {
    pub fn send(&self, message: ClientMessage) -> VoiceResult<()> {
        self.tx
            .send(message)
            .map_err(|_| VoiceError::Transport("Connection is closed".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Closes the link when told to, or when dropped
#[derive(Debug)]
pub struct CloseHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl CloseHandle {
    pub fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for CloseHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// An open bidirectional message channel
pub struct TransportLink {
    pub sender: TransportSender,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub closer: CloseHandle,
}

/// Far end of a [`TransportLink::loopback`]
pub struct LoopbackPeer {
    /// Everything the client sent, in order
    pub outbound: mpsc::UnboundedReceiver<ClientMessage>,
    /// Inject server messages and close notifications
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
    /// Resolves when the client closes its side
    pub closed: oneshot::Receiver<()>,
}

impl LoopbackPeer {
    pub fn deliver(&self, message: ServerMessage) -> bool {
        self.inbound.send(TransportEvent::Message(message)).is_ok()
    }

    pub fn close(&self, reason: Option<&str>) -> bool {
        self.inbound
            .send(TransportEvent::Closed {
                reason: reason.map(str::to_string),
            })
            .is_ok()
    }

    /// Drain what the client has sent so far
    pub fn sent(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }
}

impl TransportLink {
    /// In-process link with no network underneath
    pub fn loopback() -> (Self, LoopbackPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();

        let link = Self {
            sender: TransportSender { tx: out_tx },
            events: in_rx,
            closer: CloseHandle { tx: Some(close_tx) },
        };
        let peer = LoopbackPeer {
            outbound: out_rx,
            inbound: in_tx,
            closed: close_rx,
        };

        (link, peer)
    }
}

/// Opens links to the voice peer
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> VoiceResult<TransportLink>;
}

/// JSON-over-WebSocket connector
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, params: &ConnectParams) -> VoiceResult<TransportLink> {
        let url = params.to_url()?;
        info!(
            "Connecting to {}://{}{} (conversation {})",
            url.scheme(),
            url.host_str().unwrap_or_default(),
            url.path(),
            params.conversation_id
        );

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        info!("WebSocket connected");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let (mut ws_sink, mut ws_stream) = ws_stream.split();

            let reason = loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(message) = outgoing else {
                            // Every sender is gone; nobody can talk on this link
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break None;
                        };

                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("Failed to serialize {}: {}", message.message_type(), e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!("Failed to send {}: {}", message.message_type(), e);
                            break Some(e.to_string());
                        }
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match ServerMessage::parse(&text) {
                                    Ok(ServerMessage::Unknown) => {}
                                    Ok(message) => {
                                        debug!("Received {}", message.message_type());
                                        if event_tx.send(TransportEvent::Message(message)).is_err() {
                                            break None;
                                        }
                                    }
                                    Err(e) => warn!("Dropping malformed message: {}", e),
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("Peer closed the connection: {:?}", frame);
                                break frame
                                    .map(|f| f.reason.to_string())
                                    .filter(|r| !r.is_empty());
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                break Some(e.to_string());
                            }
                            None => {
                                info!("WebSocket stream ended");
                                break None;
                            }
                        }
                    }

                    _ = &mut close_rx => {
                        debug!("Closing WebSocket on request");
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break None;
                    }
                }
            };

            let _ = event_tx.send(TransportEvent::Closed { reason });
            info!("WebSocket connection closed");
        });

        Ok(TransportLink {
            sender: TransportSender { tx: out_tx },
            events: event_rx,
            closer: CloseHandle { tx: Some(close_tx) },
        })
    }
}
