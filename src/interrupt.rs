//! Unified source of interrupt events with reasons.
//!
//! No single teacher file owns this shape; the nearest precedent is
//! `voice/coordinator.rs`'s `VoiceEvent`/`EndReason` tagged-event-plus-
//! broadcast design, adapted here to the smaller `AbortReason` taxonomy in
//! §3.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Attached to every `abort` sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    None,
    WakeWordDetected,
    UserInterruption,
    VoiceInterruption,
    KeyboardInterruption,
}

impl AbortReason {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            AbortReason::None => "none",
            AbortReason::WakeWordDetected => "wake_word_detected",
            AbortReason::UserInterruption => "user_interruption",
            AbortReason::VoiceInterruption => "voice_interruption",
            AbortReason::KeyboardInterruption => "keyboard_interruption",
        }
    }
}

/// Emitted by wake-word or VAD; consumed by the orchestrator.
#[derive(Debug, Clone)]
pub struct InterruptEvent {
    pub reason: AbortReason,
    pub description: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl InterruptEvent {
    pub fn now(reason: AbortReason, description: String) -> Self {
        Self {
            reason,
            description,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Broadcasts `InterruptEvent`s from wake-word/VAD to the orchestrator.
/// Breaks the cyclic orchestrator<->wake-word reference described in §9:
/// wake-word publishes, the orchestrator owns the subscription, no
/// back-reference is needed.
pub struct InterruptManager {
    sender: broadcast::Sender<InterruptEvent>,
}

impl Default for InterruptManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(32);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InterruptEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: InterruptEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_match_protocol_reason_field() {
        assert_eq!(AbortReason::VoiceInterruption.as_wire_str(), "voice_interruption");
        assert_eq!(AbortReason::None.as_wire_str(), "none");
    }

    #[tokio::test]
    async fn published_events_reach_subscribers() {
        let manager = InterruptManager::new();
        let mut rx = manager.subscribe();
        manager.publish(InterruptEvent::now(AbortReason::UserInterruption, "stop".into()));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.reason, AbortReason::UserInterruption);
    }
}
