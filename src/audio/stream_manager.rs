//! Process-wide capture singleton with fan-out to multiple subscribers.
//!
//! Generalizes `voice/audio.rs`'s single-callback `AudioInput` into the
//! ref-counted owner type described for this crate: acquiring a
//! subscription returns a handle whose `Drop` decrements the reference
//! count, and the underlying device is torn down only once the count
//! reaches zero.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info, warn};

use crate::error::AudioDeviceError;

use super::frame_len;

/// A fan-out consumer of raw capture frames.
///
/// Implementations must not block: the audio callback invokes every
/// subscriber synchronously on the real-time capture thread.
pub trait CaptureSink: Send + Sync {
    fn on_frame(&self, frame: &[i16]);
}

impl<F> CaptureSink for F
where
    F: Fn(&[i16]) + Send + Sync,
{
    fn on_frame(&self, frame: &[i16]) {
        (self)(frame)
    }
}

struct ManagerState {
    running: bool,
    sample_rate: u32,
    channels: u16,
    subscribers: HashMap<u64, Arc<dyn CaptureSink>>,
    next_id: u64,
    stream: Option<cpal::Stream>,
}

impl Default for ManagerState {
    fn default() -> Self {
        Self {
            running: false,
            sample_rate: 0,
            channels: 0,
            subscribers: HashMap::new(),
            next_id: 1,
            stream: None,
        }
    }
}

// cpal::Stream is not Sync on some platforms; the manager only touches it
// from behind its own mutex so this is sound in practice the same way the
// teacher's AudioInput holds a raw cpal::Stream handle out-of-band.
unsafe impl Send for ManagerState {}

struct Inner {
    state: Mutex<ManagerState>,
    ref_count: AtomicU64,
}

/// Shared capture source. Cloning shares the same underlying singleton.
#[derive(Clone)]
pub struct AudioStreamManager {
    inner: Arc<Inner>,
}

impl Default for AudioStreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioStreamManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ManagerState::default()),
                ref_count: AtomicU64::new(0),
            }),
        }
    }

    /// Register a fan-out consumer; idempotent per handler instance in the
    /// sense that each call returns a fresh, independent subscription.
    pub fn subscribe(&self, sink: Arc<dyn CaptureSink>) -> CaptureSubscription {
        let mut state = self.inner.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, sink);
        self.inner.ref_count.fetch_add(1, Ordering::SeqCst);
        CaptureSubscription {
            id,
            manager: Arc::downgrade(&self.inner),
        }
    }

    /// Start the capture stream at the given parameters. Returns
    /// immediately if already running with identical parameters.
    pub fn start(&self, sample_rate: u32, channels: u16) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();

        if state.running && state.sample_rate == sample_rate && state.channels == channels {
            return Ok(());
        }
        if state.running {
            debug!("restarting capture with new parameters");
            Self::teardown(&mut state);
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioDeviceError::DeviceUnavailable)?;

        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let weak_inner = Arc::downgrade(&self.inner);
        let frame_size = frame_len(sample_rate) * channels as usize;
        let mut pending: Vec<i16> = Vec::with_capacity(frame_size * 2);

        let err_fn = |err| error!("audio capture stream error: {}", err);

        let sample_format = device
            .default_input_config()
            .context("failed to read default input config")?
            .sample_format();

        let stream = match sample_format {
            cpal::SampleFormat::I16 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        dispatch_frames(&weak_inner, &mut pending, data, frame_size);
                    },
                    err_fn,
                    None,
                )
                .context("failed to build i16 input stream")?,
            cpal::SampleFormat::F32 => {
                let weak_inner2 = weak_inner.clone();
                let mut pending2 = pending.clone();
                device
                    .build_input_stream(
                        &stream_config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let converted: Vec<i16> = data
                                .iter()
                                .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                                .collect();
                            dispatch_frames(&weak_inner2, &mut pending2, &converted, frame_size);
                        },
                        err_fn,
                        None,
                    )
                    .context("failed to build f32 input stream")?
            }
            other => bail!("unsupported capture sample format: {:?}", other),
        };

        stream.play().context("failed to start capture stream")?;

        state.stream = Some(stream);
        state.running = true;
        state.sample_rate = sample_rate;
        state.channels = channels;

        info!(sample_rate, channels, "capture started");
        Ok(())
    }

    /// Tear the stream down once the reference count reaches zero. Bounded
    /// to `timeout`; on timeout the state is force-reset regardless.
    pub fn stop(&self, timeout: Duration) {
        if self.inner.ref_count.load(Ordering::SeqCst) > 0 {
            return;
        }
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Ok(mut state) = self.inner.state.try_lock() {
                Self::teardown(&mut state);
                info!("capture stopped, RecordingStopped emitted");
                return;
            }
            if std::time::Instant::now() >= deadline {
                warn!("capture stop timed out, forcing reset");
                self.force_cleanup();
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Unconditional reset used from global error handlers.
    pub fn force_cleanup(&self) {
        let mut state = self.inner.state.lock().unwrap();
        Self::teardown(&mut state);
    }

    fn teardown(state: &mut ManagerState) {
        if let Some(stream) = state.stream.take() {
            drop(stream);
        }
        state.running = false;
        state.subscribers.clear();
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().unwrap().running
    }
}

fn dispatch_frames(inner: &Weak<Inner>, pending: &mut Vec<i16>, data: &[i16], frame_size: usize) {
    let Some(inner) = inner.upgrade() else { return };
    pending.extend_from_slice(data);
    while pending.len() >= frame_size {
        let frame: Vec<i16> = pending.drain(..frame_size).collect();
        if is_valid_frame(&frame) {
            let snapshot: Vec<Arc<dyn CaptureSink>> = {
                let state = match inner.state.try_lock() {
                    Ok(s) => s,
                    Err(_) => return,
                };
                state.subscribers.values().cloned().collect()
            };
            for sink in snapshot {
                sink.on_frame(&frame);
            }
        }
    }
}

/// Non-all-zero sanity check over the first 100 bytes (50 i16 samples).
fn is_valid_frame(frame: &[i16]) -> bool {
    frame.iter().take(50).any(|&s| s != 0)
}

/// RAII subscription handle. Dropping it unsubscribes and releases one
/// reference on the owning [`AudioStreamManager`].
pub struct CaptureSubscription {
    id: u64,
    manager: Weak<Inner>,
}

impl Drop for CaptureSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.manager.upgrade() {
            if let Ok(mut state) = inner.state.lock() {
                state.subscribers.remove(&self.id);
            }
            inner.ref_count.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribe_unsubscribe_is_idempotent() {
        let manager = AudioStreamManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        let sub = manager.subscribe(Arc::new(move |_: &[i16]| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(manager.inner.state.lock().unwrap().subscribers.len(), 1);
        drop(sub);
        assert_eq!(manager.inner.state.lock().unwrap().subscribers.len(), 0);
    }

    #[test]
    fn frame_validity_rejects_silence() {
        let silence = vec![0i16; 50];
        assert!(!is_valid_frame(&silence));
        let mut noisy = vec![0i16; 50];
        noisy[10] = 42;
        assert!(is_valid_frame(&noisy));
    }
}
