//! `VoiceChatService`: the single authoritative orchestrator.
//!
//! Generalized from `voice/coordinator.rs`'s `VoiceCoordinator`: the same
//! lazily-initialized `Arc<Mutex<Option<T>>>` component pattern and
//! `Arc<AtomicBool>` running flag, wired here to this crate's own
//! transport/codec/state-machine/MCP/wake-word components instead of
//! STT/LLM/TTS engines.
//!
//! Internally, every component the orchestrator needs to share with a
//! spawned background task (the uplink encoder, the live VAD feed, the
//! keep-listening auto-restart) is collected into [`OrchestratorHandles`],
//! a cheaply-`Clone`able bundle of `Arc`s. This avoids wrapping the whole
//! service in `Arc<Self>` just so its own tasks can call back into it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioCodec, AudioPlayer, AudioStreamManager, CaptureSubscription};
use crate::config::Config;
use crate::interrupt::{AbortReason, InterruptEvent, InterruptManager};
use crate::mcp::McpSubprotocol;
use crate::protocol::{
    AudioParams, ConnectionInfo, DecodedMessage, MessageKind, ProtocolCodec, ProtocolMessage,
    Session,
};
use crate::state::{ConversationStateMachine, DeviceState, StateActions, Trigger};
use crate::transport::{MqttTransport, Transport, TransportEvent, TransportFrame, WebSocketTransport};
use crate::wakeword::{KeywordSpotter, VadCoordinator};

/// Duration the orchestrator waits after a completed `Speaking` cycle
/// before re-entering `Listening`, when `KeepListening` is set (§4.8).
const KEEP_LISTENING_PAUSE: Duration = Duration::from_millis(200);

/// Events surfaced to the UI collaborator. Mirrors §4.8's "forwarded to UI
/// collaborator unchanged" rule for `Llm`, `Music`, `SystemStatus`, `Stt`,
/// and the purpose statement's "surfaces ... IoT events to a UI".
#[derive(Debug, Clone)]
pub enum VoiceChatEvent {
    Transcript { text: String },
    Emotion { emotion: Option<String> },
    Music(crate::protocol::messages::MusicState),
    SystemStatus { component: String, status: String, message: Option<String> },
    Iot { descriptors: Option<Value>, states: Option<Value> },
    Error { message: String },
    ConnectionStateChanged(bool),
}

/// Cheap clonable wrapper so background tasks can read the
/// lazily-initialized player set during `initialize`, without the whole
/// service needing to be `Arc`-wrapped internally.
#[derive(Clone)]
struct PlayerHandle {
    inner: Arc<Mutex<Option<Arc<AudioPlayer>>>>,
}

type UplinkCell = Arc<Mutex<Option<(CaptureSubscription, JoinHandle<()>)>>>;

/// Every component a background task may need to drive a state transition
/// or emit audio/network traffic on the orchestrator's behalf. Built once
/// in the constructor and cloned (cheaply — every field is an `Arc` or a
/// `Clone`-cheap handle) into each spawned task.
#[derive(Clone)]
struct OrchestratorHandles {
    state_machine: Arc<ConversationStateMachine>,
    transport: Arc<dyn Transport>,
    codec: Arc<ProtocolCodec>,
    audio_codec: Arc<AudioCodec>,
    stream_manager: AudioStreamManager,
    player: PlayerHandle,
    mcp: Arc<McpSubprotocol>,
    interrupts: Arc<InterruptManager>,
    vad: Arc<VadCoordinator>,
    keyword_spotter: Option<Arc<KeywordSpotter>>,
    keep_listening: Arc<AtomicBool>,
    session: Arc<Mutex<Option<Session>>>,
    uplink: UplinkCell,
    vad_subscription: Arc<Mutex<Option<CaptureSubscription>>>,
    events_tx: mpsc::Sender<VoiceChatEvent>,
    input_sample_rate: u32,
    output_sample_rate: u32,
    channels: u16,
    /// Mirrors `Config::enable_voice`. When false (`--no-voice`/text-only
    /// mode) the state machine still drives `Listening`/`Speaking` off
    /// protocol frames, but no cpal capture stream or uplink encoder task
    /// is ever started.
    enable_voice: bool,
}

impl OrchestratorHandles {
    async fn session_id(&self) -> Option<String> {
        self.session.lock().await.as_ref().map(|s| s.session_id.clone())
    }

    async fn send_message(&self, message: &ProtocolMessage) -> Result<()> {
        match self.codec.encode_text(message)? {
            MessageKind::Text(json) => self.transport.send_text(json).await.context("send_text failed"),
            MessageKind::Binary(_) => unreachable!("encode_text never returns binary"),
        }
    }

    /// Wraps an MCP `JsonRpcMessage` in `ProtocolMessage::Mcp` tagged with
    /// the active session id and sends it over the transport.
    async fn send_mcp(&self, payload: crate::protocol::JsonRpcMessage) -> Result<()> {
        let session_id = self.session_id().await;
        self.send_message(&ProtocolMessage::Mcp { session_id, payload }).await
    }

    /// Runs the MCP initialization handshake (§4.6 point 1): sends
    /// `initialize`, and on success marks the subsystem ready and requests
    /// `tools/list` so `tools_available()` reflects the server's registry.
    async fn run_mcp_handshake(&self) {
        let (id, request, rx) = self.mcp.build_initialize().await;
        if let Err(e) = self.send_mcp(request).await {
            warn!("failed to send mcp initialize: {}", e);
            return;
        }
        match self.mcp.await_response(id, rx).await {
            Ok(_) => {
                self.mcp.mark_initialized().await;
                info!("mcp initialize succeeded, tools/list now permitted");
                let (list_id, list_request, list_rx) = self.mcp.build_tools_list().await;
                if self.send_mcp(list_request).await.is_ok() {
                    if self.mcp.await_response(list_id, list_rx).await.is_ok() {
                        self.mcp.set_tools_available(true).await;
                    }
                }
            }
            Err(e) => warn!("mcp initialize failed: {}", e),
        }
    }

    fn transition(&self, trigger: Trigger) -> Result<DeviceState> {
        let actions = Actions { handles: self };
        self.state_machine
            .transition(trigger, &actions)
            .map_err(|e| anyhow::anyhow!(e))
    }

    /// Sends `Abort{reason}` and forces the current state to `Idle`; shared
    /// by the public `interrupt()` call and by the live VAD feed.
    async fn apply_interrupt(&self, reason: AbortReason) -> Result<()> {
        let session_id = self.session_id().await;
        self.send_message(&ProtocolMessage::Abort {
            session_id,
            reason: reason.as_wire_str().to_string(),
        })
        .await?;
        self.interrupts
            .publish(InterruptEvent::now(reason, "orchestrator interrupt".to_string()));
        self.transition(Trigger::Interrupt)?;
        Ok(())
    }

    /// `Idle -> Listening`: starts capture, subscribes the uplink encoder.
    /// Shared by the public `start_voice_chat()` call and by the
    /// keep-listening auto-restart after a completed `Speaking` cycle. In
    /// text-only mode (`enable_voice = false`) only the state transition
    /// happens; no capture device is touched.
    async fn begin_listening(&self) -> Result<()> {
        self.transition(Trigger::StartListening)?;
        if !self.enable_voice {
            return Ok(());
        }
        self.stream_manager.start(self.input_sample_rate, self.channels)?;

        let (tx, mut rx) = mpsc::channel::<Vec<i16>>(32);
        let subscription = self
            .stream_manager
            .subscribe(Arc::new(move |frame: &[i16]| {
                let _ = tx.try_send(frame.to_vec());
            }));

        let audio_codec = self.audio_codec.clone();
        let transport = self.transport.clone();
        let sample_rate = self.input_sample_rate;
        let channels = self.channels;
        let uplink_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match audio_codec.encode(&frame, sample_rate, channels) {
                    Ok(opus_bytes) => {
                        if transport.send_binary(opus_bytes).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("dropping uplink frame, encode failed: {}", e),
                }
            }
        });

        *self.uplink.lock().await = Some((subscription, uplink_task));
        Ok(())
    }

    fn stop_uplink(&self) {
        if let Ok(mut guard) = self.uplink.try_lock() {
            if let Some((subscription, task)) = guard.take() {
                task.abort();
                drop(subscription);
                self.stream_manager.stop(Duration::from_secs(5));
            }
        }
    }

    /// Schedules the `KeepListening` auto-restart (§4.8: "a completed
    /// `Speaking` cycle automatically triggers `StartListening` after a
    /// short pause"). No-op unless the flag is set.
    fn maybe_schedule_keep_listening(&self) {
        if !self.keep_listening.load(Ordering::SeqCst) {
            return;
        }
        let handles = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(KEEP_LISTENING_PAUSE).await;
            if handles.state_machine.current() == DeviceState::Idle {
                if let Err(e) = handles.begin_listening().await {
                    warn!("keep-listening auto-restart failed: {}", e);
                }
            }
        });
    }

    async fn resume_or_pause_spotter(&self, entered: DeviceState) {
        let Some(spotter) = &self.keyword_spotter else {
            return;
        };
        match entered {
            DeviceState::Listening | DeviceState::Connecting => spotter.pause().await,
            DeviceState::Speaking | DeviceState::Idle => spotter.resume().await,
            _ => {}
        }
    }

    /// Starts a permanent capture subscription that feeds 20ms sub-frames
    /// to the VAD coordinator whenever the state is `Speaking`, per §4.9:
    /// "a separate consumer of the shared stream that runs only when the
    /// state is `Speaking`". The subscription itself is held for the whole
    /// connection lifetime (dropping and re-acquiring it on every
    /// `Listening`/`Speaking` transition would race against the uplink
    /// subscription's own ref-counted start/stop).
    fn start_vad_feed(&self) -> Result<()> {
        self.stream_manager.start(self.input_sample_rate, self.channels)?;

        let handles_for_task = self.clone();
        let sub_frame_len = crate::audio::frame_len(self.input_sample_rate) / 3;
        let state_machine = self.state_machine.clone();
        let vad = self.vad.clone();
        let events_tx = self.events_tx.clone();

        let subscription = self.stream_manager.subscribe(Arc::new(move |frame: &[i16]| {
            let state = state_machine.current();
            if state != DeviceState::Speaking {
                return;
            }
            for sub_frame in frame.chunks(sub_frame_len.max(1)) {
                if let Some(event) = vad.process_sub_frame(state, sub_frame) {
                    let handles = handles_for_task.clone();
                    let events_tx = events_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handles.apply_interrupt(event.reason).await {
                            let _ = events_tx
                                .send(VoiceChatEvent::Error {
                                    message: format!("failed to apply voice interrupt: {}", e),
                                })
                                .await;
                        }
                    });
                    break;
                }
            }
        }));

        // Fire-and-forget: `Drop` on `CaptureSubscription` would release
        // the uplink's ref count prematurely if this were dropped early,
        // so it is parked in a dedicated cell for the connection lifetime.
        let cell = self.vad_subscription.clone();
        tokio::spawn(async move {
            *cell.lock().await = Some(subscription);
        });
        Ok(())
    }
}

struct Actions<'a> {
    handles: &'a OrchestratorHandles,
}

impl StateActions for Actions<'_> {
    fn on_exit(&self, state: DeviceState) {
        match state {
            DeviceState::Listening => {
                self.handles.stop_uplink();
            }
            DeviceState::Speaking => {
                if let Ok(guard) = self.handles.player.inner.try_lock() {
                    if let Some(player) = guard.clone() {
                        player.drain();
                    }
                }
                self.handles.vad.reset();
            }
            _ => {}
        }
    }

    fn on_enter(&self, state: DeviceState) {
        let handles = self.handles.clone();
        tokio::spawn(async move { handles.resume_or_pause_spotter(state).await });
        if state == DeviceState::Idle {
            self.handles.maybe_schedule_keep_listening();
        }
    }
}

/// Single authoritative coordinator wiring state machine, audio, transport,
/// wake-word, and interrupts together.
pub struct VoiceChatService {
    config: Config,
    connection_info: ConnectionInfo,
    handles: OrchestratorHandles,
    events_rx: Mutex<Option<mpsc::Receiver<VoiceChatEvent>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceChatService {
    pub fn new(
        config: Config,
        connection_info: ConnectionInfo,
        keyword_spotter: Option<Arc<KeywordSpotter>>,
    ) -> Self {
        let transport: Arc<dyn Transport> = if config.use_websocket {
            Arc::new(WebSocketTransport::new())
        } else {
            Arc::new(MqttTransport::new())
        };
        Self::with_transport(config, connection_info, keyword_spotter, transport)
    }

    /// Explicit composition-root constructor: wires a caller-supplied
    /// [`Transport`] instead of picking WebSocket/MQTT from `Config`. Used
    /// by tests to substitute an in-memory transport for the real socket.
    pub fn with_transport(
        config: Config,
        connection_info: ConnectionInfo,
        keyword_spotter: Option<Arc<KeywordSpotter>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);

        let handles = OrchestratorHandles {
            state_machine: Arc::new(ConversationStateMachine::new()),
            transport,
            codec: Arc::new(ProtocolCodec::new()),
            audio_codec: Arc::new(AudioCodec::new()),
            stream_manager: AudioStreamManager::new(),
            player: PlayerHandle {
                inner: Arc::new(Mutex::new(None)),
            },
            mcp: Arc::new(McpSubprotocol::new()),
            interrupts: Arc::new(InterruptManager::new()),
            vad: Arc::new(VadCoordinator::new(crate::wakeword::VadConfig::default())),
            keyword_spotter,
            keep_listening: Arc::new(AtomicBool::new(false)),
            session: Arc::new(Mutex::new(None)),
            uplink: Arc::new(Mutex::new(None)),
            vad_subscription: Arc::new(Mutex::new(None)),
            events_tx,
            input_sample_rate: config.audio.audio_input_sample_rate,
            output_sample_rate: config.audio.audio_output_sample_rate,
            channels: config.audio.audio_channels,
            enable_voice: config.enable_voice,
        };

        Self {
            config,
            connection_info,
            handles,
            events_rx: Mutex::new(Some(events_rx)),
            receive_task: Mutex::new(None),
        }
    }

    pub fn events(&self) -> mpsc::Receiver<VoiceChatEvent> {
        self.events_rx
            .try_lock()
            .ok()
            .and_then(|mut g| g.take())
            .expect("events receiver already taken")
    }

    pub fn set_keep_listening(&self, keep_listening: bool) {
        self.handles.keep_listening.store(keep_listening, Ordering::SeqCst);
    }

    pub fn current_state(&self) -> DeviceState {
        self.handles.state_machine.current()
    }

    /// Creates transport/codec/player/capture subscription; performs Hello
    /// handshake; transitions `Idle -> Connecting -> Idle`.
    ///
    /// Per §4.5, no frame besides the server's Hello is accepted until the
    /// handshake completes: the first inbound frame is awaited and
    /// validated here, before the general receive loop starts dispatching
    /// traffic. Anything else arriving first is a `ProtocolViolation` and
    /// aborts the connection attempt.
    pub async fn initialize(&self) -> Result<()> {
        self.handles.transition(Trigger::Connect)?;

        self.handles
            .transport
            .connect(&self.connection_info)
            .await
            .context("transport connect failed")?;

        let hello = ProtocolMessage::Hello {
            version: 1,
            transport: if self.config.use_websocket {
                "websocket".to_string()
            } else {
                "mqtt".to_string()
            },
            audio_params: AudioParams {
                format: self.config.audio.audio_format.clone(),
                sample_rate: self.handles.output_sample_rate,
                channels: self.handles.channels,
                frame_duration: 60,
            },
            session_id: None,
            features: Some(serde_json::json!({"mcp": true})),
        };
        self.handles.send_message(&hello).await?;

        if self.config.enable_voice {
            let player = Arc::new(AudioPlayer::new(self.handles.output_sample_rate, self.handles.channels)?);
            *self.handles.player.inner.lock().await = Some(player);
        }

        let mut frames = self
            .handles
            .transport
            .take_frames()
            .context("frames receiver already taken")?;
        let transport_events = self.handles.transport.take_events();

        let session = match self.await_server_hello(&mut frames).await {
            Ok(session) => session,
            Err(e) => {
                let _ = self.handles.transition(Trigger::Error);
                self.handles.transport.disconnect().await;
                return Err(e);
            }
        };

        self.handles
            .codec
            .set_active_session_id(Some(session.session_id.clone()));
        let mcp_eligible = session.mcp_eligible;
        *self.handles.session.lock().await = Some(session);

        self.spawn_receive_loop(frames, transport_events).await;

        if mcp_eligible {
            info!("server advertised mcp support, McpReadyForInitialization");
            let handles = self.handles.clone();
            tokio::spawn(async move { handles.run_mcp_handshake().await });
        }

        if self.config.enable_voice {
            if let Err(e) = self.handles.start_vad_feed() {
                warn!("failed to start live VAD capture feed: {}", e);
            }
        }

        self.handles.transition(Trigger::Connected)?;
        self.handles.state_machine.set_connected(true);
        Ok(())
    }

    /// Blocks on the transport's first inbound frame and validates it is
    /// the server's Hello, per the "Server Hello is required before any
    /// other frame is accepted" rule. Bounded by a handshake timeout so a
    /// silent server cannot hang `initialize` forever.
    async fn await_server_hello(
        &self,
        frames: &mut mpsc::Receiver<TransportFrame>,
    ) -> Result<Session> {
        const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

        let frame = tokio::time::timeout(HELLO_TIMEOUT, frames.recv())
            .await
            .context("ProtocolViolation: timed out waiting for server Hello")?
            .context("ProtocolViolation: transport closed before server Hello")?;

        let text = match frame {
            TransportFrame::Text(text) => text,
            TransportFrame::Binary(_) => {
                anyhow::bail!("ProtocolViolation: binary frame received before server Hello")
            }
        };

        match self.handles.codec.decode_text(&text)? {
            DecodedMessage::Known(ProtocolMessage::Hello {
                session_id,
                audio_params,
                features,
                ..
            }) => {
                let session_id = session_id
                    .context("ProtocolViolation: server Hello missing session_id")?;
                let mcp_eligible = features
                    .as_ref()
                    .and_then(|f| f.get("mcp"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(Session {
                    session_id,
                    connected_at: chrono::Utc::now(),
                    audio_params,
                    mcp_eligible,
                })
            }
            _ => anyhow::bail!("ProtocolViolation: frame received before server Hello"),
        }
    }

    /// `Idle -> Listening`; subscribes to capture, encodes each 60ms frame,
    /// sends it as binary.
    pub async fn start_voice_chat(&self) -> Result<()> {
        self.handles.begin_listening().await
    }

    /// `Listening -> Idle`; sends `Listen{state:"stop"}`; unsubscribes.
    pub async fn stop_voice_chat(&self) -> Result<()> {
        let session_id = self.handles.session_id().await;
        self.handles
            .send_message(&ProtocolMessage::Listen {
                session_id,
                state: "stop".to_string(),
                mode: None,
                text: None,
            })
            .await?;
        self.handles.transition(Trigger::StopListening)?;
        Ok(())
    }

    /// Sends `Abort{reason}`; forces current state to `Idle`; resets
    /// playback buffer.
    pub async fn interrupt(&self, reason: AbortReason) -> Result<()> {
        self.handles.apply_interrupt(reason).await
    }

    /// Sends a text chat frame; does not change state.
    pub async fn send_text(&self, text: String) -> Result<()> {
        let session_id = self.handles.session_id().await;
        self.handles
            .send_message(&ProtocolMessage::Listen {
                session_id,
                state: "detect".to_string(),
                mode: None,
                text: Some(text),
            })
            .await
    }

    /// Invokes a server-advertised tool by name, per §4.6 point 3. Fails
    /// with the distinct `McpClientError` variant rather than a success
    /// carrying an empty result; on disconnect, a pending call resolves to
    /// `ConnectionLost` instead of hanging.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, crate::error::McpClientError> {
        let (id, request, rx) = self.handles.mcp.build_tool_call(name, arguments).await;
        self.handles
            .send_mcp(request)
            .await
            .map_err(|_| crate::error::McpClientError::NotConnected)?;
        self.handles.mcp.await_response(id, rx).await
    }

    /// Manual/auto mode convenience toggle per §4.8.
    pub async fn toggle_chat_state(&self) -> Result<()> {
        match self.current_state() {
            DeviceState::Idle if self.handles.keep_listening.load(Ordering::SeqCst) => {
                self.start_voice_chat().await
            }
            DeviceState::Listening => self.interrupt(AbortReason::UserInterruption).await,
            DeviceState::Speaking => {
                if let Some(player) = self.handles.player.inner.lock().await.clone() {
                    player.stop();
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// `any -> Disconnect -> Idle`; clears the session, tears down the
    /// uplink and VAD capture subscriptions, and closes the transport.
    /// Idempotent: calling it twice in a row is a no-op the second time.
    pub async fn disconnect(&self) -> Result<()> {
        self.handles.mcp.fail_all_pending().await;
        self.handles.stop_uplink();
        *self.handles.vad_subscription.lock().await = None;
        *self.handles.session.lock().await = None;
        self.handles.codec.set_active_session_id(None);
        if let Some(task) = self.receive_task.lock().await.take() {
            task.abort();
        }
        self.handles.transport.disconnect().await;
        self.handles.transition(Trigger::Disconnect)?;
        Ok(())
    }

    async fn spawn_receive_loop(
        &self,
        mut frames: mpsc::Receiver<TransportFrame>,
        transport_events: Option<mpsc::Receiver<TransportEvent>>,
    ) {
        let handles = self.handles.clone();
        let events_tx = self.handles.events_tx.clone();

        let task = tokio::spawn(async move {
            if let Some(mut events) = transport_events {
                let events_tx2 = events_tx.clone();
                let handles2 = handles.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        match event {
                            TransportEvent::ConnectionLost(reason) => {
                                warn!("connection lost: {}", reason);
                                // §7 ConnectionLost: transient, transport
                                // errors trigger Disconnect per §4.8; any
                                // in-flight MCP request fails with
                                // McpCallFailed(ConnectionLost) per §4.6.
                                handles2.mcp.fail_all_pending().await;
                                handles2.stop_uplink();
                                *handles2.vad_subscription.lock().await = None;
                                *handles2.session.lock().await = None;
                                handles2.codec.set_active_session_id(None);
                                let _ = handles2.transition(Trigger::Disconnect);
                                let _ = events_tx2
                                    .send(VoiceChatEvent::Error {
                                        message: format!("ConnectionLost: {}", reason),
                                    })
                                    .await;
                                let _ = events_tx2
                                    .send(VoiceChatEvent::ConnectionStateChanged(false))
                                    .await;
                            }
                            TransportEvent::ConnectionStateChanged(connected) => {
                                let _ = events_tx2
                                    .send(VoiceChatEvent::ConnectionStateChanged(connected))
                                    .await;
                            }
                        }
                    }
                });
            }

            while let Some(frame) = frames.recv().await {
                match frame {
                    TransportFrame::Text(text) => {
                        handle_text_frame(&text, &handles, &events_tx).await;
                    }
                    TransportFrame::Binary(bytes) => {
                        handle_binary_frame(bytes, &handles).await;
                    }
                }
            }
        });

        *self.receive_task.lock().await = Some(task);
    }
}

async fn handle_text_frame(
    text: &str,
    handles: &OrchestratorHandles,
    events_tx: &mpsc::Sender<VoiceChatEvent>,
) {
    let decoded = match handles.codec.decode_text(text) {
        Ok(d) => d,
        Err(e) => {
            error!("protocol violation decoding text frame: {}", e);
            let _ = events_tx
                .send(VoiceChatEvent::Error {
                    message: format!("ProtocolViolation: {}", e),
                })
                .await;
            return;
        }
    };

    let DecodedMessage::Known(message) = decoded else {
        debug!("unrecognized protocol message type preserved, not acted on");
        return;
    };

    match message {
        ProtocolMessage::Tts { state, .. } => match state.as_str() {
            "start" => {
                if handles.state_machine.current() != DeviceState::Speaking {
                    let _ = handles.transition(Trigger::StartSpeaking);
                }
            }
            "stop" => {
                if handles.state_machine.current() == DeviceState::Speaking {
                    let _ = handles.transition(Trigger::StopSpeaking);
                }
            }
            _ => {}
        },
        ProtocolMessage::Stt { text, .. } => {
            let _ = events_tx.send(VoiceChatEvent::Transcript { text }).await;
        }
        ProtocolMessage::Llm { emotion, .. } => {
            let _ = events_tx.send(VoiceChatEvent::Emotion { emotion }).await;
        }
        ProtocolMessage::Music { state, .. } => {
            let _ = events_tx.send(VoiceChatEvent::Music(state)).await;
        }
        ProtocolMessage::SystemStatus {
            component,
            status,
            message,
            ..
        } => {
            let _ = events_tx
                .send(VoiceChatEvent::SystemStatus {
                    component,
                    status,
                    message,
                })
                .await;
        }
        ProtocolMessage::Iot {
            descriptors, states, ..
        } => {
            let _ = events_tx
                .send(VoiceChatEvent::Iot { descriptors, states })
                .await;
        }
        ProtocolMessage::Mcp { payload, .. } => {
            handles.mcp.handle_inbound(payload).await;
        }
        _ => {}
    }
}

async fn handle_binary_frame(bytes: Vec<u8>, handles: &OrchestratorHandles) {
    // Binary audio while not in Speaking is still decoded and played; if
    // Listening, the orchestrator first issues StartSpeaking, per the
    // tolerant ordering resolved in SPEC_FULL.md §9.
    if handles.state_machine.current() != DeviceState::Speaking {
        let _ = handles.transition(Trigger::StartSpeaking);
    }

    let pcm = handles
        .audio_codec
        .decode(&bytes, handles.output_sample_rate, handles.channels);
    if let Some(player) = handles.player.inner.lock().await.clone() {
        player.enqueue(pcm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_reason_wire_strings_round_trip() {
        assert_eq!(AbortReason::VoiceInterruption.as_wire_str(), "voice_interruption");
    }
}
