//! xiaozhi-client - cross-platform voice-assistant client library
//!
//! Holds a full-duplex voice conversation with a remote "xiaozhi" AI
//! service: captures and encodes microphone audio, streams it over
//! WebSocket (or MQTT), decodes and plays returned audio, surfaces
//! model-driven text/emotion/music/IoT events, and invokes
//! server-advertised tools via an embedded JSON-RPC 2.0 MCP layer.
//!
//! # Example
//!
//! ```ignore
//! use xiaozhi_client::config::Config;
//! use xiaozhi_client::service::VoiceChatService;
//! use xiaozhi_client::protocol::ConnectionInfo;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(&Config::default_path()?)?;
//!     let connection_info = ConnectionInfo {
//!         server_url: config.server_url.clone(),
//!         device_id: "device-1".to_string(),
//!         client_id: uuid::Uuid::new_v4().to_string(),
//!         auth_token: std::env::var("XIAOZHI_AUTH_TOKEN").ok(),
//!         mqtt: None,
//!     };
//!     let service = VoiceChatService::new(config, connection_info, None);
//!     service.initialize().await?;
//!     service.start_voice_chat().await?;
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod mcp;
pub mod protocol;
pub mod service;
pub mod state;
pub mod transport;
pub mod wakeword;

pub use config::Config;
pub use service::{VoiceChatEvent, VoiceChatService};
pub use state::{ConversationStateMachine, DeviceState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
