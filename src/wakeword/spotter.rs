//! Wake-word pause/resume coordinator.
//!
//! The acoustic model itself is explicitly out of scope (per the original
//! spec's carve-out: "the coordinator only consumes a `KeywordDetected`
//! event"); this module only owns the `{Stopped, Running, Paused}` state
//! machine, the explicit-restart-after-detection rule, and the
//! single-permit-semaphore serialization described in §4.9.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::CaptureSubscription;
use crate::error::RecognizerError;

/// `{Stopped, Running, Paused}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotterState {
    Stopped,
    Running,
    Paused,
}

/// Minimum gap enforced between consecutive restarts.
const RESTART_MIN_GAP: Duration = Duration::from_millis(50);
/// Back-off delay before retrying after a recoverable error.
const ERROR_RESTART_DELAY: Duration = Duration::from_millis(300);
/// Consecutive restart failures after which keyword spotting is disabled.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Pluggable acoustic recognizer. A single call to `listen_once` should
/// block (asynchronously) until either a keyword match or a recoverable
/// error; typical SDKs terminate after one match, which is why the
/// coordinator restarts it explicitly rather than expecting it to loop.
#[async_trait]
pub trait RecognizerBackend: Send + Sync {
    async fn listen_once(&self) -> Result<(), RecognizerError>;
}

/// Coordinates pause/resume and detection-driven restart of a
/// [`RecognizerBackend`], emitting `KeywordDetected` via `on_detected`.
pub struct KeywordSpotter {
    backend: Arc<dyn RecognizerBackend>,
    state: Mutex<SpotterState>,
    restart_permit: Arc<Semaphore>,
    consecutive_failures: Mutex<u32>,
    disabled: AtomicBool,
    on_detected: Arc<dyn Fn() + Send + Sync>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl KeywordSpotter {
    pub fn new(backend: Arc<dyn RecognizerBackend>, on_detected: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            backend,
            state: Mutex::new(SpotterState::Stopped),
            restart_permit: Arc::new(Semaphore::new(1)),
            consecutive_failures: Mutex::new(0),
            disabled: AtomicBool::new(false),
            on_detected,
            loop_task: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> SpotterState {
        *self.state.lock().await
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Idempotent: starting an already-running spotter is a no-op.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if *state == SpotterState::Running {
                return;
            }
            *state = SpotterState::Running;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_loop().await });
        *self.loop_task.lock().await = Some(handle);
    }

    /// Idempotent: pausing a stopped/paused spotter is a no-op.
    pub async fn pause(&self) {
        let mut state = self.state.lock().await;
        if *state != SpotterState::Running {
            return;
        }
        *state = SpotterState::Paused;
        debug!("keyword spotter paused");
    }

    /// Idempotent: resuming a running spotter is a no-op.
    pub async fn resume(&self) {
        let mut state = self.state.lock().await;
        if *state == SpotterState::Running || self.disabled.load(Ordering::SeqCst) {
            return;
        }
        *state = SpotterState::Running;
        debug!("keyword spotter resumed");
    }

    /// Idempotent: stopping an already-stopped spotter is a no-op.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if *state == SpotterState::Stopped {
            return;
        }
        *state = SpotterState::Stopped;
        if let Some(task) = self.loop_task.lock().await.take() {
            task.abort();
        }
    }

    /// Swaps the underlying capture subscription without losing position.
    /// The recognizer backend itself owns the subscription; this is a
    /// marker hook for implementations that need to rebind it.
    pub fn update_audio_source(&self, _subscription: CaptureSubscription) {
        debug!("keyword spotter audio source swapped");
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            if self.disabled.load(Ordering::SeqCst) {
                return;
            }
            if *self.state.lock().await != SpotterState::Running {
                tokio::time::sleep(RESTART_MIN_GAP).await;
                continue;
            }

            let permit = self.restart_permit.acquire().await.expect("semaphore never closed");
            let result = self.backend.listen_once().await;
            drop(permit);

            match result {
                Ok(()) => {
                    info!("keyword detected, restarting recognizer");
                    *self.consecutive_failures.lock().await = 0;
                    (self.on_detected)();
                    tokio::time::sleep(RESTART_MIN_GAP).await;
                }
                Err(e) => {
                    warn!("recognizer error: {}, scheduling restart", e);
                    let mut failures = self.consecutive_failures.lock().await;
                    *failures += 1;
                    if *failures >= MAX_CONSECUTIVE_FAILURES {
                        self.disabled.store(true, Ordering::SeqCst);
                        *self.state.lock().await = SpotterState::Stopped;
                        warn!(
                            "keyword spotting disabled after {} consecutive restart failures",
                            *failures
                        );
                        return;
                    }
                    drop(failures);
                    tokio::time::sleep(ERROR_RESTART_DELAY).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysError;
    #[async_trait]
    impl RecognizerBackend for AlwaysError {
        async fn listen_once(&self) -> Result<(), RecognizerError> {
            Err(RecognizerError::Sdk("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn disables_after_three_consecutive_failures() {
        let spotter = Arc::new(KeywordSpotter::new(Arc::new(AlwaysError), Arc::new(|| {})));
        spotter.start().await;
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(spotter.is_disabled());
    }

    #[tokio::test]
    async fn pause_resume_idempotent() {
        struct NeverDetects;
        #[async_trait]
        impl RecognizerBackend for NeverDetects {
            async fn listen_once(&self) -> Result<(), RecognizerError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }
        let count = Arc::new(AtomicUsize::new(0));
        let spotter = Arc::new(KeywordSpotter::new(Arc::new(NeverDetects), Arc::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })));
        spotter.pause().await;
        spotter.pause().await;
        assert_eq!(spotter.state().await, SpotterState::Stopped);
        spotter.start().await;
        spotter.pause().await;
        spotter.pause().await;
        assert_eq!(spotter.state().await, SpotterState::Paused);
        spotter.stop().await;
    }
}
