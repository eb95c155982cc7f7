//! Conversation state machine: `{Idle, Connecting, Listening, Speaking}`.
//!
//! Generalized from `voice/coordinator.rs`'s `ConversationState` (which
//! conflates STT/LLM/TTS sub-steps into one linear enum) down to the
//! smaller 4-state table in §4.7, kept behind the same
//! `Arc<Mutex<>>`-plus-broadcast pattern the teacher uses for its event
//! stream.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::StateError;

/// `{Idle, Connecting, Listening, Speaking}`. Exactly one value at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Idle,
    Connecting,
    Listening,
    Speaking,
}

/// Triggers accepted by the transition table in §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Connect,
    Connected,
    Disconnect,
    StartListening,
    StopListening,
    StartSpeaking,
    StopSpeaking,
    Interrupt,
    Error,
}

/// Broadcast on every legal transition.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub from: DeviceState,
    pub to: DeviceState,
    pub trigger: Trigger,
}

/// Entry/exit action hooks invoked synchronously, under the same lock
/// acquisition that performs the transition.
pub trait StateActions: Send + Sync {
    fn on_exit(&self, _state: DeviceState) {}
    fn on_enter(&self, _state: DeviceState) {}
}

struct NoopActions;
impl StateActions for NoopActions {}

/// Holds the current `DeviceState` under a single mutex and broadcasts
/// `TransitionEvent`s. Only `VoiceChatService` is expected to call
/// `transition`; other components observe via `subscribe`.
pub struct ConversationStateMachine {
    state: Mutex<DeviceState>,
    is_connected: Mutex<bool>,
    events: broadcast::Sender<TransitionEvent>,
}

impl Default for ConversationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStateMachine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(DeviceState::Idle),
            is_connected: Mutex::new(false),
            events,
        }
    }

    pub fn current(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    pub fn set_connected(&self, connected: bool) {
        *self.is_connected.lock().unwrap() = connected;
    }

    pub fn is_connected(&self) -> bool {
        *self.is_connected.lock().unwrap()
    }

    /// Attempt the transition named by `trigger`. Illegal triggers are
    /// rejected with a logged warning and leave the state unchanged,
    /// matching the "all others are rejected" rule in §4.7.
    pub fn transition(
        &self,
        trigger: Trigger,
        actions: &dyn StateActions,
    ) -> Result<DeviceState, StateError> {
        let mut state = self.state.lock().unwrap();
        let from = *state;
        let to = match (from, trigger) {
            (DeviceState::Idle, Trigger::Connect) => DeviceState::Connecting,
            (DeviceState::Connecting, Trigger::Connected) => DeviceState::Idle,
            (DeviceState::Connecting, Trigger::Error) => DeviceState::Idle,
            (DeviceState::Connecting, Trigger::Disconnect) => DeviceState::Idle,
            (DeviceState::Idle, Trigger::StartListening) if self.is_connected() => {
                DeviceState::Listening
            }
            (DeviceState::Listening, Trigger::StopListening) => DeviceState::Idle,
            (DeviceState::Listening, Trigger::Interrupt) => DeviceState::Idle,
            (DeviceState::Idle, Trigger::StartSpeaking) => DeviceState::Speaking,
            (DeviceState::Listening, Trigger::StartSpeaking) => DeviceState::Speaking,
            (DeviceState::Speaking, Trigger::StopSpeaking) => DeviceState::Idle,
            (DeviceState::Speaking, Trigger::Interrupt) => DeviceState::Idle,
            (_, Trigger::Disconnect) => DeviceState::Idle,
            _ => {
                warn!(?from, ?trigger, "illegal state transition rejected");
                return Err(StateError::IllegalTransition {
                    from: format!("{:?}", from),
                    trigger: format!("{:?}", trigger),
                });
            }
        };

        if trigger == Trigger::Disconnect {
            self.set_connected(false);
        }

        actions.on_exit(from);
        *state = to;
        drop(state);
        actions.on_enter(to);

        let _ = self.events.send(TransitionEvent { from, to, trigger });
        Ok(to)
    }

    /// Convenience overload for call sites with no entry/exit actions.
    pub fn transition_noop(&self, trigger: Trigger) -> Result<DeviceState, StateError> {
        self.transition(trigger, &NoopActions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_sequence_matches_s1() {
        let sm = ConversationStateMachine::new();
        assert_eq!(sm.current(), DeviceState::Idle);

        sm.transition_noop(Trigger::Connect).unwrap();
        assert_eq!(sm.current(), DeviceState::Connecting);

        sm.transition_noop(Trigger::Connected).unwrap();
        assert_eq!(sm.current(), DeviceState::Idle);

        sm.set_connected(true);
        sm.transition_noop(Trigger::StartListening).unwrap();
        assert_eq!(sm.current(), DeviceState::Listening);

        sm.transition_noop(Trigger::StartSpeaking).unwrap();
        assert_eq!(sm.current(), DeviceState::Speaking);

        sm.transition_noop(Trigger::StopSpeaking).unwrap();
        assert_eq!(sm.current(), DeviceState::Idle);
    }

    #[test]
    fn illegal_transition_leaves_state_unchanged() {
        let sm = ConversationStateMachine::new();
        let err = sm.transition_noop(Trigger::StopSpeaking).unwrap_err();
        assert!(matches!(err, StateError::IllegalTransition { .. }));
        assert_eq!(sm.current(), DeviceState::Idle);
    }

    #[test]
    fn start_listening_requires_connection() {
        let sm = ConversationStateMachine::new();
        let err = sm.transition_noop(Trigger::StartListening).unwrap_err();
        assert!(matches!(err, StateError::IllegalTransition { .. }));
    }

    #[test]
    fn disconnect_from_any_state_clears_session() {
        let sm = ConversationStateMachine::new();
        sm.set_connected(true);
        sm.transition_noop(Trigger::StartListening).unwrap();
        sm.transition_noop(Trigger::Disconnect).unwrap();
        assert_eq!(sm.current(), DeviceState::Idle);
        assert!(!sm.is_connected());
    }
}
