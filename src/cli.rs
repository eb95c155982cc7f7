//! CLI entry point: arg parsing plus an interactive driver for manual
//! testing. Out of the core's testable surface per the spec's Non-goals,
//! but it is the crate's ambient entry point, the way the teacher's
//! `cli.rs` sits alongside its specified core.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::interrupt::AbortReason;
use crate::protocol::ConnectionInfo;
use crate::service::{VoiceChatEvent, VoiceChatService};

#[derive(Parser, Debug)]
#[command(name = "xiaozhi-client")]
#[command(about = "Cross-platform voice-assistant client for the xiaozhi AI service")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file; defaults to the platform config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured server URL
    #[arg(long)]
    server_url: Option<String>,

    /// Disable voice capture/playback and run in text-only mode
    #[arg(long)]
    no_voice: bool,

    /// Override the tracing log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Connect and start listening immediately instead of waiting for `chat`
    #[arg(long)]
    auto_connect: bool,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load(&Config::default_path()?).unwrap_or_else(|_| Config {
            server_url: "wss://localhost/xiaozhi/v1/".to_string(),
            use_websocket: true,
            mqtt: Default::default(),
            enable_voice: true,
            audio: Default::default(),
            auto_connect: false,
            keyword_models: Default::default(),
        }),
    };

    if let Some(url) = cli.server_url {
        config.server_url = url;
    }
    if cli.no_voice {
        config.enable_voice = false;
    }
    if cli.auto_connect {
        config.auto_connect = true;
    }
    config.validate()?;

    let connection_info = ConnectionInfo {
        server_url: config.server_url.clone(),
        device_id: stable_device_id(),
        client_id: Uuid::new_v4().to_string(),
        auth_token: std::env::var("XIAOZHI_AUTH_TOKEN").ok(),
        mqtt: config.mqtt.mqtt_broker.as_ref().map(|broker| {
            crate::protocol::MqttConnectionInfo {
                broker: broker.clone(),
                port: config.mqtt.mqtt_port.unwrap_or(1883),
                client_id: config
                    .mqtt
                    .mqtt_client_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                topic: config.mqtt.mqtt_topic.clone().unwrap_or_default(),
            }
        }),
    };

    let service = Arc::new(VoiceChatService::new(config.clone(), connection_info, None));
    let mut events = service.events();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    service.initialize().await?;
    info!("connected to {}", config.server_url);

    if config.auto_connect && config.enable_voice {
        service.start_voice_chat().await?;
    }

    run_interactive_loop(service).await
}

fn log_event(event: &VoiceChatEvent) {
    match event {
        VoiceChatEvent::Transcript { text } => info!(text = %text, "stt"),
        VoiceChatEvent::Emotion { emotion } => info!(?emotion, "llm emotion"),
        VoiceChatEvent::Music(state) => info!(?state, "music"),
        VoiceChatEvent::SystemStatus { component, status, .. } => {
            info!(component = %component, status = %status, "system status")
        }
        VoiceChatEvent::Iot { descriptors, states } => {
            info!(?descriptors, ?states, "iot")
        }
        VoiceChatEvent::Error { message } => error!(message = %message, "voice chat error"),
        VoiceChatEvent::ConnectionStateChanged(connected) => {
            info!(connected, "connection state changed")
        }
    }
}

/// Minimal interactive driver: `l` starts listening, `s` stops, `i`
/// interrupts, any other line is sent as text chat, `q` quits.
async fn run_interactive_loop(service: Arc<VoiceChatService>) -> Result<()> {
    println!("xiaozhi-client ready. commands: l=listen s=stop i=interrupt q=quit, or type text to send");
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "q" => {
                service.disconnect().await.ok();
                break;
            }
            "l" => service.start_voice_chat().await?,
            "s" => service.stop_voice_chat().await?,
            "i" => service.interrupt(AbortReason::UserInterruption).await?,
            "" => {}
            text => service.send_text(text.to_string()).await?,
        }
    }
    Ok(())
}

fn stable_device_id() -> String {
    // A stable, host-derived identifier; falls back to a fresh uuid if the
    // platform hostname cannot be read.
    std::env::var("XIAOZHI_DEVICE_ID")
        .ok()
        .or_else(|| hostname())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("COMPUTERNAME").ok())
}
