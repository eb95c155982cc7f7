//! Opus encode/decode, one long-lived codec instance per `(sample_rate,
//! channels)` pair, created lazily and cached.
//!
//! Grounded in the `OpusService` pattern used server-side for this
//! protocol: a synchronous `Decoder::decode(&bin, &mut out, false) ->
//! usize` call per frame, one decoder per sample rate.

use std::collections::HashMap;
use std::sync::Mutex;

use opus::{Application, Channels, Decoder, Encoder};
use tracing::warn;

use crate::error::CodecError;

use super::frame_len;

fn opus_channels(channels: u16) -> Channels {
    if channels == 2 {
        Channels::Stereo
    } else {
        Channels::Mono
    }
}

struct CodecPair {
    encoder: Encoder,
    decoder: Decoder,
}

/// Facade over cached Opus encoder/decoder pairs.
pub struct AudioCodec {
    codecs: Mutex<HashMap<(u32, u16), CodecPair>>,
}

impl Default for AudioCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCodec {
    pub fn new() -> Self {
        Self {
            codecs: Mutex::new(HashMap::new()),
        }
    }

    fn with_pair<T>(
        &self,
        sample_rate: u32,
        channels: u16,
        f: impl FnOnce(&mut CodecPair) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        let mut codecs = self.codecs.lock().unwrap();
        let pair = match codecs.entry((sample_rate, channels)) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(v) => {
                let encoder = Encoder::new(sample_rate, opus_channels(channels), Application::Voip)?;
                let decoder = Decoder::new(sample_rate, opus_channels(channels))?;
                v.insert(CodecPair { encoder, decoder })
            }
        };
        f(pair)
    }

    /// Encode exactly one 60ms PCM frame into one Opus packet.
    pub fn encode(&self, pcm: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>, CodecError> {
        let expected = frame_len(sample_rate) * channels as usize;
        if pcm.is_empty() {
            return Err(CodecError::BufferTooSmall);
        }
        if pcm.len() != expected {
            return Err(CodecError::WrongFrameLength {
                expected,
                actual: pcm.len(),
            });
        }
        self.with_pair(sample_rate, channels, |pair| {
            let mut out = vec![0u8; 4000];
            let len = pair
                .encoder
                .encode(pcm, &mut out)
                .map_err(CodecError::from)?;
            out.truncate(len);
            Ok(out)
        })
    }

    /// Decode one Opus packet into exactly one 60ms PCM frame. On decoder
    /// error, returns a silence frame of the expected size instead of
    /// failing, to protect real-time playback.
    pub fn decode(&self, opus_bytes: &[u8], sample_rate: u32, channels: u16) -> Vec<i16> {
        let expected = frame_len(sample_rate) * channels as usize;
        let result = self.with_pair(sample_rate, channels, |pair| {
            let mut out = vec![0i16; expected];
            let len = pair
                .decoder
                .decode(opus_bytes, &mut out, false)
                .map_err(CodecError::from)?;
            out.truncate(len);
            out.resize(expected, 0);
            Ok(out)
        });
        match result {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("opus decode failed, emitting silence frame: {}", e);
                vec![0i16; expected]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_zero_length_fails() {
        let codec = AudioCodec::new();
        let err = codec.encode(&[], 16_000, 1).unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall));
    }

    #[test]
    fn round_trip_silence_frame() {
        let codec = AudioCodec::new();
        let silence = vec![0i16; frame_len(16_000)];
        let encoded = codec.encode(&silence, 16_000, 1).expect("encode");
        let decoded = codec.decode(&encoded, 16_000, 1);
        assert_eq!(decoded.len(), frame_len(16_000));
    }

    #[test]
    fn decode_of_garbage_yields_silence_of_expected_length() {
        let codec = AudioCodec::new();
        let garbage = vec![0xFFu8; 4];
        let decoded = codec.decode(&garbage, 24_000, 1);
        assert_eq!(decoded.len(), frame_len(24_000));
    }
}
