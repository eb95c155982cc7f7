//! Shared error taxonomy.
//!
//! Module boundaries that a caller needs to `match` on expose a
//! `thiserror`-derived enum; everything above that boundary (the
//! orchestrator, the CLI) works in terms of `anyhow::Result`.

use thiserror::Error;

/// Errors surfaced by [`crate::transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused by server")]
    ConnectionRefused,
    #[error("websocket/mqtt handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("unauthorized (bad or missing credentials)")]
    Unauthorized,
    #[error("not connected")]
    NotConnected,
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("mqtt error: {0}")]
    Mqtt(String),
}

/// Errors surfaced by [`crate::protocol`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame received before server Hello")]
    ViolationBeforeHello,
    #[error("audio params mismatch: expected {expected:?}, got {actual:?}")]
    AudioParamsMismatch { expected: String, actual: String },
    #[error("malformed JSON frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors surfaced by [`crate::audio::codec`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("scratch buffer too small to hold encoded/decoded frame")]
    BufferTooSmall,
    #[error("opus error: {0}")]
    Opus(#[from] opus::Error),
    #[error("pcm frame has wrong length: expected {expected}, got {actual}")]
    WrongFrameLength { expected: usize, actual: usize },
}

/// Errors surfaced by [`crate::mcp`].
#[derive(Debug, Error)]
pub enum McpClientError {
    #[error("not connected to transport")]
    NotConnected,
    #[error("request timed out")]
    Timeout,
    #[error("connection lost while request was pending")]
    ConnectionLost,
    #[error("server returned an error: [{code}] {message}")]
    ServerError { code: i64, message: String },
    #[error("malformed JSON-RPC frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors surfaced by [`crate::wakeword`].
#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("recognizer handle invalid, restart required")]
    InvalidHandle,
    #[error("underlying recognizer SDK error: {0}")]
    Sdk(String),
    #[error("keyword spotting disabled after {0} consecutive failed restarts")]
    Disabled(u32),
}

/// Errors surfaced by [`crate::state`].
#[derive(Debug, Error)]
pub enum StateError {
    #[error("illegal transition: {trigger:?} is not valid from {from:?}")]
    IllegalTransition { from: String, trigger: String },
}

/// Errors surfaced by [`crate::audio`] device management.
#[derive(Debug, Error)]
pub enum AudioDeviceError {
    #[error("no default audio device available")]
    DeviceUnavailable,
    #[error("device already claimed by another exclusive user")]
    AlreadyBusy,
    #[error(transparent)]
    Cpal(#[from] anyhow::Error),
}
