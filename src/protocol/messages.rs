//! `ProtocolMessage` and friends.
//!
//! Field names and the `#[serde(tag = "type", rename_all = "snake_case")]`
//! shape are grounded in the reference xiaozhi protocol server handler
//! (`ClientMessage`/`ServerMessage` there), the closest ground truth for
//! this exact wire format available in the retrieval pack.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Negotiated once per session, fixed for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            format: "opus".to_string(),
            sample_rate: 24_000,
            channels: 1,
            frame_duration: 60,
        }
    }
}

/// Server Hello may echo only a subset of `AudioParams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioParamsResponse {
    pub sample_rate: u32,
    pub frame_duration: u32,
}

/// `{session_id, connected_at, audio_params}`, created on a successful
/// Hello exchange and destroyed on disconnect.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub audio_params: AudioParams,
    /// Whether the server's Hello advertised `features.mcp: true`, making
    /// the MCP subsystem eligible for initialization per §4.6.
    pub mcp_eligible: bool,
}

/// `{server_url, device_id, client_id}` used to build the WebSocket
/// upgrade headers or MQTT client id. The `mqtt` fields are populated only
/// when `Config::use_websocket` is false. `auth_token` (§6) is the bearer
/// credential sent on the WebSocket upgrade; `client_id` is a device
/// identifier, not a secret, and must not stand in for it.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub server_url: String,
    pub device_id: String,
    pub client_id: String,
    pub auth_token: Option<String>,
    pub mqtt: Option<MqttConnectionInfo>,
}

/// MQTT alternate-transport connection parameters (§6).
#[derive(Debug, Clone)]
pub struct MqttConnectionInfo {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `{jsonrpc, id?, method?, params?, result?, error?}`. Requests have
/// `id+method`; responses have `id+(result|error)`; notifications have
/// `method` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none()
    }
}

/// `{action, song_name?, artist?, position, duration, lyric_text?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicState {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyric_text: Option<String>,
}

/// Every variant carries `type` (the serde tag) and an optional
/// `session_id`. Unknown `type`s are preserved verbatim as `Generic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    Hello {
        version: u32,
        transport: String,
        audio_params: AudioParams,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        features: Option<Value>,
    },
    Listen {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Tts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Stt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        text: String,
    },
    Llm {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        emotion: Option<String>,
    },
    Music {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(flatten)]
        state: MusicState,
    },
    SystemStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        component: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Iot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        descriptors: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        states: Option<Value>,
    },
    Abort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        reason: String,
    },
    Goodbye {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Mcp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        payload: JsonRpcMessage,
    },
    #[serde(other)]
    Generic,
}

/// Unknown-type frames are kept verbatim rather than dropped; since
/// `#[serde(other)]` cannot carry data, unknown frames are represented
/// separately from the tagged enum at the codec layer (see
/// `ProtocolCodec::decode_text`).
#[derive(Debug, Clone)]
pub struct GenericProtocolMessage {
    pub type_tag: String,
    pub raw: Value,
}
