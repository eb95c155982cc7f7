//! Real-time audio pipeline: shared capture fan-out, Opus codec, jitter-buffered playback.
//!
//! # Architecture
//!
//! ```text
//! Microphone -> AudioStreamManager -> { WakeWordDetector, VoiceUplinkEncoder }
//! Server -> AudioCodec::decode -> AudioPlayer -> Speaker
//! ```

pub mod codec;
pub mod player;
pub mod stream_manager;

pub use codec::AudioCodec;
pub use player::AudioPlayer;
pub use stream_manager::{AudioStreamManager, CaptureSubscription};

/// 60ms framing at 16kHz uplink.
pub const UPLINK_SAMPLE_RATE: u32 = 16_000;
/// 60ms framing at 24kHz downlink.
pub const DOWNLINK_SAMPLE_RATE: u32 = 24_000;
/// Frame duration shared by both directions.
pub const FRAME_DURATION_MS: u32 = 60;

/// Number of 16-bit samples in one frame at `sample_rate`.
pub const fn frame_len(sample_rate: u32) -> usize {
    (sample_rate as u64 * FRAME_DURATION_MS as u64 / 1000) as usize
}
