//! Energy-based voice-activity interruption, active only while `Speaking`.
//!
//! Simplified from `voice/vad.rs`'s dB-based adaptive-noise-floor detector
//! down to the fixed-threshold model published in §4.9 (Open Question #2:
//! the teacher and the original source disagree on defaults in two places;
//! this crate takes the spec's published numbers and exposes both as
//! tunables).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::info;

use crate::interrupt::{AbortReason, InterruptEvent};
use crate::state::DeviceState;

/// RMS energy threshold (16-bit scale) and consecutive-sub-frame window.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    pub energy_threshold: f64,
    pub speech_window: u32,
    pub sub_frame_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 300.0,
            speech_window: 5,
            sub_frame_ms: 20,
        }
    }
}

/// RMS energy over a 16-bit PCM sub-frame.
pub fn rms_energy(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Consumes the shared capture stream only while the conversation state is
/// `Speaking`; emits exactly one `VoiceInterruption` per `Speaking` cycle.
pub struct VadCoordinator {
    config: VadConfig,
    consecutive_speech: Mutex<u32>,
    fired_this_cycle: AtomicBool,
}

impl VadCoordinator {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            consecutive_speech: Mutex::new(0),
            fired_this_cycle: AtomicBool::new(false),
        }
    }

    /// Called with every 20ms sub-frame while `state == Speaking`. Returns
    /// `Some(InterruptEvent)` exactly once per `Speaking` cycle, the first
    /// time the window of consecutive speech sub-frames is satisfied.
    pub fn process_sub_frame(&self, state: DeviceState, sub_frame: &[i16]) -> Option<InterruptEvent> {
        if state != DeviceState::Speaking {
            self.reset();
            return None;
        }

        let energy = rms_energy(sub_frame);
        let mut consecutive = self.consecutive_speech.lock().unwrap();
        if energy > self.config.energy_threshold {
            *consecutive += 1;
        } else {
            *consecutive = 0;
        }

        if *consecutive >= self.config.speech_window
            && !self.fired_this_cycle.swap(true, Ordering::SeqCst)
        {
            info!(energy, "voice interruption detected mid-speech");
            return Some(InterruptEvent::now(
                AbortReason::VoiceInterruption,
                "energy-based VAD interruption".to_string(),
            ));
        }
        None
    }

    /// Resets the speech counter and the once-per-cycle latch; called
    /// whenever the state exits `Speaking`.
    pub fn reset(&self) {
        *self.consecutive_speech.lock().unwrap() = 0;
        self.fired_this_cycle.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_frame(rms: f64, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let phase = i as f64 * 0.3;
                (rms * std::f64::consts::SQRT_2 * phase.sin()) as i16
            })
            .collect()
    }

    #[test]
    fn five_consecutive_loud_subframes_fire_once() {
        let vad = VadCoordinator::new(VadConfig::default());
        let loud = sine_frame(1000.0, 320);
        let mut fired = 0;
        for _ in 0..10 {
            if vad
                .process_sub_frame(DeviceState::Speaking, &loud)
                .is_some()
            {
                fired += 1;
            }
        }
        assert_eq!(fired, 1, "must emit exactly one VoiceInterruption");
    }

    #[test]
    fn silence_never_fires() {
        let vad = VadCoordinator::new(VadConfig::default());
        let silence = vec![0i16; 320];
        for _ in 0..20 {
            assert!(vad.process_sub_frame(DeviceState::Speaking, &silence).is_none());
        }
    }

    #[test]
    fn only_active_while_speaking() {
        let vad = VadCoordinator::new(VadConfig::default());
        let loud = sine_frame(1000.0, 320);
        for _ in 0..10 {
            assert!(vad.process_sub_frame(DeviceState::Listening, &loud).is_none());
        }
    }

    #[test]
    fn counter_resets_on_silence_sub_frame() {
        let vad = VadCoordinator::new(VadConfig::default());
        let loud = sine_frame(1000.0, 320);
        let silence = vec![0i16; 320];
        for _ in 0..4 {
            assert!(vad.process_sub_frame(DeviceState::Speaking, &loud).is_none());
        }
        assert!(vad.process_sub_frame(DeviceState::Speaking, &silence).is_none());
        for _ in 0..4 {
            assert!(vad.process_sub_frame(DeviceState::Speaking, &loud).is_none());
        }
        assert!(vad.process_sub_frame(DeviceState::Speaking, &loud).is_some());
    }
}
