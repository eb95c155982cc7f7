//! Transport clients: WebSocket primary, MQTT alternate.
//!
//! The `Transport` trait shape is grounded in the pack's WebRTC transport
//! reference file (connect/send/close/is_connected/event callback); the
//! WebSocket implementation's outward-connecting pattern (split stream,
//! dedicated writer task) is grounded in `messaging/slack.rs`'s socket-mode
//! client.

pub mod mqtt;
pub mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::ConnectionInfo;

pub use mqtt::MqttTransport;
pub use websocket::WebSocketTransport;

/// An inbound frame as delivered by a [`Transport`]'s receive loop.
#[derive(Debug, Clone)]
pub enum TransportFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Connection lifecycle events a transport reports to its owner.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ConnectionStateChanged(bool),
    ConnectionLost(String),
}

/// Outward contract shared by the WebSocket and MQTT implementations.
/// Reconnection is the orchestrator's responsibility; a transport only
/// reports state.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, info: &ConnectionInfo) -> Result<(), TransportError>;
    async fn send_text(&self, json: String) -> Result<(), TransportError>;
    async fn send_binary(&self, opus_bytes: Vec<u8>) -> Result<(), TransportError>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;

    /// Takes the receiver for inbound frames. Returns `None` if already
    /// taken; callers are expected to take it exactly once after `connect`.
    fn take_frames(&self) -> Option<mpsc::Receiver<TransportFrame>>;

    /// Takes the receiver for connection lifecycle events.
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;
}
