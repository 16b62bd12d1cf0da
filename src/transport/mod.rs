//! Transport adapter: JSON messages over a bidirectional connection

pub mod client;
pub mod messages;
pub mod token;

pub use client::{
    CloseHandle, ConnectParams, Connector, LoopbackPeer, TransportEvent, TransportLink,
    TransportSender, WebSocketConnector,
};
pub use messages::{ClientMessage, ServerMessage};
pub use token::{EndpointTokenProvider, StaticToken, TokenProvider};
