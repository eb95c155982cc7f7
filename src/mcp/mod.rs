//! Embedded JSON-RPC 2.0 MCP sub-protocol.
//!
//! Adapted from `gglib-mcp`'s `client.rs`: the id-counter, pending-request
//! correlation, and structured-error patterns transfer directly, but the
//! transport plumbing is replaced — frames travel inside
//! `ProtocolMessage::Mcp{payload}` over whichever [`crate::transport::Transport`]
//! is active rather than over a stdio child process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::McpClientError;
use crate::protocol::JsonRpcMessage;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A handler for incoming notifications, dispatched by `method` name.
pub trait NotificationHandler: Send + Sync {
    fn handle(&self, method: &str, params: Option<Value>);
}

impl<F> NotificationHandler for F
where
    F: Fn(&str, Option<Value>) + Send + Sync,
{
    fn handle(&self, method: &str, params: Option<Value>) {
        (self)(method, params)
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<JsonRpcMessage>>;

/// Sends `initialize`/`tools/list`/`tools/call` requests over the current
/// transport and correlates responses arriving via `ProtocolMessage::Mcp`.
pub struct McpSubprotocol {
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
    initialized: Mutex<bool>,
    tools_available: Mutex<bool>,
    handlers: Mutex<Vec<Arc<dyn NotificationHandler>>>,
}

impl Default for McpSubprotocol {
    fn default() -> Self {
        Self::new()
    }
}

impl McpSubprotocol {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            initialized: Mutex::new(false),
            tools_available: Mutex::new(false),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub async fn register_notification_handler(&self, handler: Arc<dyn NotificationHandler>) {
        self.handlers.lock().await.push(handler);
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Build the `initialize` request; caller sends it via the active
    /// transport wrapped in `ProtocolMessage::Mcp`.
    pub async fn build_initialize(&self) -> (u64, JsonRpcMessage, oneshot::Receiver<JsonRpcMessage>) {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        let params = json!({
            "protocolVersion": "2024-11-05",
            "clientInfo": {"name": "xiaozhi-client", "version": env!("CARGO_PKG_VERSION")},
            "capabilities": {},
        });
        (id, JsonRpcMessage::request(id, "initialize", Some(params)), rx)
    }

    pub async fn mark_initialized(&self) {
        *self.initialized.lock().await = true;
    }

    pub async fn set_tools_available(&self, available: bool) {
        *self.tools_available.lock().await = available;
    }

    /// Build a `tools/list` request; a successful `initialize` response
    /// permits sending this per §4.6.
    pub async fn build_tools_list(&self) -> (u64, JsonRpcMessage, oneshot::Receiver<JsonRpcMessage>) {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        (id, JsonRpcMessage::request(id, "tools/list", None), rx)
    }

    /// Build a `tools/call` request; `{name, arguments}` per §4.6.
    pub async fn build_tool_call(
        &self,
        name: &str,
        arguments: Value,
    ) -> (u64, JsonRpcMessage, oneshot::Receiver<JsonRpcMessage>) {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        let params = json!({"name": name, "arguments": arguments});
        (id, JsonRpcMessage::request(id, "tools/call", Some(params)), rx)
    }

    /// Await a previously built request's response with the protocol's
    /// bounded timeout, translating a timed-out or disconnected pending
    /// request into the appropriate error.
    pub async fn await_response(
        &self,
        id: u64,
        rx: oneshot::Receiver<JsonRpcMessage>,
    ) -> Result<Value, McpClientError> {
        let response = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                return Err(McpClientError::ConnectionLost);
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(McpClientError::Timeout);
            }
        };
        if let Some(error) = response.error {
            return Err(McpClientError::ServerError {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Dispatch an inbound `JsonRpcMessage` (arrived via
    /// `ProtocolMessage::Mcp`): responses resolve pending requests by id,
    /// notifications (no id) are dispatched to registered handlers.
    pub async fn handle_inbound(&self, message: JsonRpcMessage) {
        if message.is_response() {
            let id = message.id.expect("response always carries an id");
            let mut pending = self.pending.lock().await;
            if let Some(tx) = pending.remove(&id) {
                let _ = tx.send(message);
            } else {
                warn!(id, "unmatched JSON-RPC response id, dropping");
            }
            return;
        }
        if let Some(method) = message.method.clone() {
            debug!(method = %method, "mcp notification received");
            let handlers = self.handlers.lock().await;
            for handler in handlers.iter() {
                handler.handle(&method, message.params.clone());
            }
        }
    }

    /// Fail every pending request on connection loss, per §4.6's
    /// invariant.
    pub async fn fail_all_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            // Sender side is simply dropped; `await_response`'s recv then
            // observes a closed channel and reports `ConnectionLost`.
            drop(tx);
        }
    }

    pub async fn is_initialized(&self) -> bool {
        *self.initialized.lock().await
    }

    pub async fn tools_available(&self) -> bool {
        *self.tools_available.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcError;

    #[tokio::test]
    async fn response_resolves_matching_pending_request() {
        let mcp = McpSubprotocol::new();
        let (id, _req, rx) = mcp.build_initialize().await;

        let response = JsonRpcMessage {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(json!({"ok": true})),
            error: None,
        };
        mcp.handle_inbound(response).await;

        let result = mcp.await_response(id, rx).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn server_error_surfaces_as_distinct_failure() {
        let mcp = McpSubprotocol::new();
        let (id, _req, rx) = mcp.build_tool_call("camera.capture", json!({})).await;

        let response = JsonRpcMessage {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(JsonRpcError {
                code: -32000,
                message: "device offline".to_string(),
                data: None,
            }),
        };
        mcp.handle_inbound(response).await;

        let err = mcp.await_response(id, rx).await.unwrap_err();
        assert!(matches!(err, McpClientError::ServerError { code: -32000, .. }));
    }

    #[tokio::test]
    async fn disconnect_fails_pending_requests() {
        let mcp = McpSubprotocol::new();
        let (id, _req, rx) = mcp.build_tool_call("camera.capture", json!({})).await;
        mcp.fail_all_pending().await;
        let err = mcp.await_response(id, rx).await.unwrap_err();
        assert!(matches!(err, McpClientError::ConnectionLost));
    }
}
