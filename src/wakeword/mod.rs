//! Wake-word pause/resume coordination and energy-based VAD interruption.

pub mod spotter;
pub mod vad;

pub use spotter::{KeywordSpotter, SpotterState};
pub use vad::{VadConfig, VadCoordinator};
