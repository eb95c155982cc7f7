//! WebSocket primary transport.
//!
//! Outward-connecting client pattern grounded in `messaging/slack.rs`'s
//! `socket_mode::start_socket_mode` (split stream via `futures_util`,
//! `connect_async`, match on `WsMessage::Text`/`Close`); the heartbeat loop
//! is grounded in `gateway/heartbeat.rs`'s `tokio::select!` sleep/shutdown
//! pattern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::protocol::ConnectionInfo;

use super::{Transport, TransportEvent, TransportFrame};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

struct Tasks {
    receive: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

pub struct WebSocketTransport {
    connected: Arc<AtomicBool>,
    writer_tx: Mutex<Option<mpsc::Sender<WsMessage>>>,
    frames_rx: Mutex<Option<mpsc::Receiver<TransportFrame>>>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    events_tx: mpsc::Sender<TransportEvent>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Tasks>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(32);
        let (shutdown, _) = broadcast::channel(4);
        Self {
            connected: Arc::new(AtomicBool::new(false)),
            writer_tx: Mutex::new(None),
            frames_rx: Mutex::new(None),
            events_rx: Mutex::new(Some(events_rx)),
            events_tx,
            shutdown,
            tasks: Mutex::new(Tasks {
                receive: None,
                heartbeat: None,
            }),
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, info: &ConnectionInfo) -> Result<(), TransportError> {
        let bearer = info.auth_token.as_deref().unwrap_or("");
        let request = Request::builder()
            .uri(info.server_url.clone())
            .header("Authorization", format!("Bearer {}", bearer))
            .header("Protocol-Version", "1")
            .header("Device-Id", info.device_id.clone())
            .header("Client-Id", info.client_id.clone())
            .header("Host", host_from_url(&info.server_url))
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .body(())
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

        let (ws_stream, response) = connect_async(request).await.map_err(|e| match &e {
            tokio_tungstenite::tungstenite::Error::Http(resp)
                if resp.status().as_u16() == 401 =>
            {
                TransportError::Unauthorized
            }
            tokio_tungstenite::tungstenite::Error::Http(_) => TransportError::ConnectionRefused,
            other => TransportError::HandshakeFailed(other.to_string()),
        })?;
        debug!(status = ?response.status(), "websocket upgrade accepted");

        let (write, mut read) = ws_stream.split();
        let (writer_tx, mut writer_rx) = mpsc::channel::<WsMessage>(64);

        // Single writer task: serializes all outgoing frames, preserving
        // submission order.
        let mut write = write;
        tokio::spawn(async move {
            while let Some(msg) = writer_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let (frames_tx, frames_rx) = mpsc::channel(128);
        let connected = self.connected.clone();
        let events_tx = self.events_tx.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let frame_seen = Arc::new(AtomicBool::new(false));

        let receive_frame_seen = frame_seen.clone();
        let receive_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                receive_frame_seen.store(true, Ordering::SeqCst);
                                let _ = frames_tx.send(TransportFrame::Text(text.to_string())).await;
                            }
                            Some(Ok(WsMessage::Binary(bin))) => {
                                receive_frame_seen.store(true, Ordering::SeqCst);
                                let _ = frames_tx.send(TransportFrame::Binary(bin.to_vec())).await;
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                info!("websocket closed by peer");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("websocket read error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            let _ = events_tx.send(TransportEvent::ConnectionStateChanged(false)).await;
        });

        let heartbeat_writer = writer_tx.clone();
        let mut heartbeat_shutdown = self.shutdown.subscribe();
        let heartbeat_events = self.events_tx.clone();
        let heartbeat_connected = self.connected.clone();
        let heartbeat_frame_seen = frame_seen;
        let heartbeat_task = tokio::spawn(async move {
            let mut missed = 0u32;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                        // §4.4: ConnectionLost fires on absence of any server
                        // frame for 3xN, not on the heartbeat reply specifically.
                        if heartbeat_frame_seen.swap(false, Ordering::SeqCst) {
                            missed = 0;
                        } else {
                            missed += 1;
                        }
                        if heartbeat_writer.send(WsMessage::Text(String::new().into())).await.is_err() {
                            break;
                        }
                        if missed >= 3 {
                            heartbeat_connected.store(false, Ordering::SeqCst);
                            let _ = heartbeat_events
                                .send(TransportEvent::ConnectionLost("heartbeat timeout".to_string()))
                                .await;
                            break;
                        }
                    }
                    _ = heartbeat_shutdown.recv() => break,
                }
            }
        });

        *self.writer_tx.lock().await = Some(writer_tx);
        *self.frames_rx.lock().await = Some(frames_rx);
        self.tasks.lock().await.receive = Some(receive_task);
        self.tasks.lock().await.heartbeat = Some(heartbeat_task);
        self.connected.store(true, Ordering::SeqCst);
        let _ = self
            .events_tx
            .send(TransportEvent::ConnectionStateChanged(true))
            .await;

        Ok(())
    }

    async fn send_text(&self, json: String) -> Result<(), TransportError> {
        let guard = self.writer_tx.lock().await;
        let tx = guard.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(WsMessage::Text(json.into()))
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    async fn send_binary(&self, opus_bytes: Vec<u8>) -> Result<(), TransportError> {
        let guard = self.writer_tx.lock().await;
        let tx = guard.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(WsMessage::Binary(opus_bytes.into()))
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    async fn disconnect(&self) {
        if let Some(tx) = self.writer_tx.lock().await.take() {
            let _ = tx.send(WsMessage::Close(None)).await;
        }
        let _ = self.shutdown.send(());
        let deadline = tokio::time::sleep(CLOSE_TIMEOUT);
        tokio::pin!(deadline);
        let mut tasks = self.tasks.lock().await;
        if let Some(handle) = tasks.receive.take() {
            tokio::select! {
                _ = handle => {}
                _ = &mut deadline => { }
            }
        }
        if let Some(handle) = tasks.heartbeat.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn take_frames(&self) -> Option<mpsc::Receiver<TransportFrame>> {
        self.frames_rx.try_lock().ok().and_then(|mut g| g.take())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.try_lock().ok().and_then(|mut g| g.take())
    }
}

fn host_from_url(url: &str) -> String {
    url.trim_start_matches("wss://")
        .trim_start_matches("ws://")
        .split('/')
        .next()
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction_strips_scheme_and_path() {
        assert_eq!(host_from_url("wss://example.com/xiaozhi/v1/"), "example.com");
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_a_noop() {
        let transport = WebSocketTransport::new();
        transport.disconnect().await;
        assert!(!transport.is_connected());
    }
}
