//! Translation between [`ProtocolMessage`] and on-wire bytes.

use serde_json::Value;
use std::sync::Mutex;

use crate::error::ProtocolError;

use super::messages::{GenericProtocolMessage, ProtocolMessage};

/// One outbound or inbound transport frame.
#[derive(Debug, Clone)]
pub enum MessageKind {
    Text(String),
    Binary(Vec<u8>),
}

/// Result of decoding a text frame: either a recognized `ProtocolMessage`
/// or an unrecognized `type` preserved verbatim, per the "never dropped"
/// rule in the contract.
#[derive(Debug, Clone)]
pub enum DecodedMessage {
    Known(ProtocolMessage),
    Unknown(GenericProtocolMessage),
}

const KNOWN_TYPES: &[&str] = &[
    "hello", "listen", "tts", "stt", "llm", "music", "system_status", "iot", "abort", "goodbye",
    "mcp",
];

/// Translates `ProtocolMessage` to/from on-wire bytes. Tracks only the
/// currently active `session_id` (set from the last Hello seen), needed to
/// tag outgoing binary frames per the contract.
pub struct ProtocolCodec {
    active_session_id: Mutex<Option<String>>,
}

impl Default for ProtocolCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec {
    pub fn new() -> Self {
        Self {
            active_session_id: Mutex::new(None),
        }
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.active_session_id.lock().unwrap().clone()
    }

    pub fn set_active_session_id(&self, id: Option<String>) {
        *self.active_session_id.lock().unwrap() = id;
    }

    /// Serialize a `ProtocolMessage` to a text frame.
    pub fn encode_text(&self, message: &ProtocolMessage) -> Result<MessageKind, ProtocolError> {
        let json = serde_json::to_string(message)?;
        Ok(MessageKind::Text(json))
    }

    /// Wrap a binary Opus packet into a transport frame. No extra framing
    /// is added; the active session id is implicit context carried by the
    /// codec rather than embedded in the bytes, per §4.5.
    pub fn encode_binary(&self, opus_packet: Vec<u8>) -> MessageKind {
        MessageKind::Binary(opus_packet)
    }

    /// Decode a UTF-8 JSON text frame. Unknown `type`s are preserved
    /// verbatim rather than dropped.
    pub fn decode_text(&self, text: &str) -> Result<DecodedMessage, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let type_tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        if KNOWN_TYPES.contains(&type_tag.as_str()) {
            let message: ProtocolMessage = serde_json::from_value(value)?;
            if let ProtocolMessage::Hello {
                session_id: Some(ref sid),
                ..
            } = message
            {
                self.set_active_session_id(Some(sid.clone()));
            }
            Ok(DecodedMessage::Known(message))
        } else {
            Ok(DecodedMessage::Unknown(GenericProtocolMessage {
                type_tag,
                raw: value,
            }))
        }
    }

    /// Downlink binary frames carry no explicit session id on the wire;
    /// this associates the currently active one for the caller's benefit.
    pub fn decode_binary(&self, bytes: Vec<u8>) -> (Vec<u8>, Option<String>) {
        (bytes, self.active_session_id())
    }
}
