//! MQTT alternate transport.
//!
//! Mirrors the WebSocket contract (§4.4): connect/send/receive-loop with
//! the same outward shape, topics derived from server-provided
//! configuration, QoS-1 for control, QoS-0 for audio. `rumqttc` is a new
//! dependency for this crate, grounded in the one pack manifest
//! (`Kimjaechol-MoA_new`) that depends on an MQTT client for broker-based
//! event ingestion — no pack teacher candidate uses an MQTT crate
//! directly, so this is the closest ecosystem precedent available.
//!
//! Per the Open Questions resolution in SPEC_FULL.md §9, MCP is mirrored on
//! a dedicated `<topic>/mcp` subtopic rather than silently dropped over
//! MQTT: the client subscribes there for inbound MCP traffic, and
//! `send_text` sniffs the `"type":"mcp"` tag (cheaper than decoding the
//! whole frame, and avoids widening `Transport::send_text` to carry
//! message-type metadata) to route outbound `Mcp` frames there too, keeping
//! them off the shared control subtopic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::TransportError;
use crate::protocol::ConnectionInfo;

use super::{Transport, TransportEvent, TransportFrame};

const CONTROL_SUBTOPIC: &str = "control";
const AUDIO_SUBTOPIC: &str = "audio";
const MCP_SUBTOPIC: &str = "mcp";

/// Routes an outbound text frame to the mcp subtopic if it carries
/// `"type":"mcp"`, control otherwise. A substring check is enough here: the
/// codec always emits `serde_json::to_string`'s compact, space-free output.
fn outbound_subtopic_for(json: &str) -> &'static str {
    if json.contains(r#""type":"mcp""#) {
        MCP_SUBTOPIC
    } else {
        CONTROL_SUBTOPIC
    }
}

pub struct MqttTransport {
    connected: Arc<AtomicBool>,
    client: Mutex<Option<AsyncClient>>,
    topic: Mutex<Option<String>>,
    frames_rx: Mutex<Option<mpsc::Receiver<TransportFrame>>>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    events_tx: mpsc::Sender<TransportEvent>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(32);
        Self {
            connected: Arc::new(AtomicBool::new(false)),
            client: Mutex::new(None),
            topic: Mutex::new(None),
            frames_rx: Mutex::new(None),
            events_rx: Mutex::new(Some(events_rx)),
            events_tx,
            poll_task: Mutex::new(None),
        }
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, info: &ConnectionInfo) -> Result<(), TransportError> {
        let mqtt = info
            .mqtt
            .as_ref()
            .ok_or_else(|| TransportError::HandshakeFailed("missing mqtt configuration".into()))?;

        let mut opts = MqttOptions::new(mqtt.client_id.clone(), mqtt.broker.clone(), mqtt.port);
        opts.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(opts, 64);

        client
            .subscribe(format!("{}/{}", mqtt.topic, CONTROL_SUBTOPIC), QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Mqtt(e.to_string()))?;
        client
            .subscribe(format!("{}/{}", mqtt.topic, AUDIO_SUBTOPIC), QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::Mqtt(e.to_string()))?;
        client
            .subscribe(format!("{}/{}", mqtt.topic, MCP_SUBTOPIC), QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Mqtt(e.to_string()))?;

        let (frames_tx, frames_rx) = mpsc::channel(128);
        let connected = self.connected.clone();
        let events_tx = self.events_tx.clone();

        let poll_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if publish.topic.ends_with(AUDIO_SUBTOPIC) {
                            let _ = frames_tx
                                .send(TransportFrame::Binary(publish.payload.to_vec()))
                                .await;
                        } else {
                            let text = String::from_utf8_lossy(&publish.payload).to_string();
                            let _ = frames_tx.send(TransportFrame::Text(text)).await;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("mqtt connection lost: {}", e);
                        connected.store(false, Ordering::SeqCst);
                        let _ = events_tx
                            .send(TransportEvent::ConnectionLost(e.to_string()))
                            .await;
                        break;
                    }
                }
            }
        });

        *self.client.lock().await = Some(client);
        *self.topic.lock().await = Some(mqtt.topic.clone());
        *self.frames_rx.lock().await = Some(frames_rx);
        *self.poll_task.lock().await = Some(poll_task);
        self.connected.store(true, Ordering::SeqCst);
        info!(broker = %mqtt.broker, topic = %mqtt.topic, "mqtt connected");
        let _ = self
            .events_tx
            .send(TransportEvent::ConnectionStateChanged(true))
            .await;
        Ok(())
    }

    async fn send_text(&self, json: String) -> Result<(), TransportError> {
        let client_guard = self.client.lock().await;
        let client = client_guard.as_ref().ok_or(TransportError::NotConnected)?;
        let topic_guard = self.topic.lock().await;
        let topic = topic_guard.as_ref().ok_or(TransportError::NotConnected)?;
        let subtopic = outbound_subtopic_for(&json);
        client
            .publish(format!("{}/{}", topic, subtopic), QoS::AtLeastOnce, false, json)
            .await
            .map_err(|e| TransportError::Mqtt(e.to_string()))
    }

    async fn send_binary(&self, opus_bytes: Vec<u8>) -> Result<(), TransportError> {
        let client_guard = self.client.lock().await;
        let client = client_guard.as_ref().ok_or(TransportError::NotConnected)?;
        let topic_guard = self.topic.lock().await;
        let topic = topic_guard.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .publish(
                format!("{}/{}", topic, AUDIO_SUBTOPIC),
                QoS::AtMostOnce,
                false,
                opus_bytes,
            )
            .await
            .map_err(|e| TransportError::Mqtt(e.to_string()))
    }

    async fn disconnect(&self) {
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
        }
        if let Some(task) = self.poll_task.lock().await.take() {
            task.abort();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_without_connect_is_not_connected() {
        let transport = MqttTransport::new();
        let err = transport.send_text("{}".to_string()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[test]
    fn mcp_frames_route_to_the_mcp_subtopic() {
        assert_eq!(
            outbound_subtopic_for(r#"{"type":"mcp","payload":{}}"#),
            MCP_SUBTOPIC
        );
        assert_eq!(
            outbound_subtopic_for(r#"{"type":"abort","reason":"none"}"#),
            CONTROL_SUBTOPIC
        );
    }
}
