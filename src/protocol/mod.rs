//! Wire protocol: JSON text frames plus binary Opus frames, and the
//! embedded JSON-RPC 2.0 MCP sub-protocol.

pub mod codec;
pub mod messages;

pub use codec::{DecodedMessage, MessageKind, ProtocolCodec};
pub use messages::{
    AudioParams, AudioParamsResponse, ConnectionInfo, JsonRpcError, JsonRpcMessage,
    MqttConnectionInfo, ProtocolMessage, Session,
};
