//! Cancellable one-shot delay used by the gesture classifier.
//!
//! A [`ClickTimer`] waits a fixed delay and then runs an action, unless it
//! is cancelled or restarted first. The armed/fired/idle phase and a start
//! generation share one atomic word, so "cancel" and "fire" racing on
//! another thread always resolve to exactly one winner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::trace;

const IDLE: u64 = 0;
const ARMED: u64 = 1;
const FIRED: u64 = 2;
const PHASE_MASK: u64 = 0b11;

fn pack(generation: u64, phase: u64) -> u64 {
    (generation << 2) | phase
}

/// One-shot timer with at most one pending wait.
#[derive(Debug)]
pub struct ClickTimer {
    delay: Duration,
    state: Arc<AtomicU64>,
    pending: Mutex<Option<AbortHandle>>,
}

impl ClickTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::new(AtomicU64::new(pack(0, IDLE))),
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm the timer.
    ///
    /// A wait already in flight is abandoned. When the delay elapses without
    /// a cancel or restart in between, `action` receives the time elapsed
    /// since this call.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&self, action: F)
    where
        F: FnOnce(Duration) + Send + 'static,
    {
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(pack((current >> 2).wrapping_add(1), ARMED))
            })
            .unwrap_or_else(|current| current);
        let armed = pack((previous >> 2).wrapping_add(1), ARMED);

        let state = Arc::clone(&self.state);
        let delay = self.delay;
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let fired = pack(armed >> 2, FIRED);
            if state
                .compare_exchange(armed, fired, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                action(started.elapsed());
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stale) = pending.replace(handle.abort_handle()) {
            stale.abort();
        }
    }

    /// Disarm the timer.
    ///
    /// Returns `true` if the timer was armed, meaning the pending action is
    /// now guaranteed not to run. Returns `false` if it already fired or was
    /// never started.
    pub fn cancel(&self) -> bool {
        let disarmed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current & PHASE_MASK == ARMED).then(|| pack(current >> 2, IDLE))
            })
            .is_ok();

        if disarmed {
            trace!(delay = ?self.delay, "Click timer cancelled");
            if let Some(pending) = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                pending.abort();
            }
        }
        disarmed
    }

    /// True while a wait is pending.
    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) & PHASE_MASK == ARMED
    }
}

impl Drop for ClickTimer {
    fn drop(&mut self) {
        if let Some(pending) = self
            .pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pending.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce(Duration) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        (count, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay_with_elapsed() {
        let timer = ClickTimer::new(Duration::from_millis(350));
        let (tx, rx) = tokio::sync::oneshot::channel();

        timer.start(move |elapsed| {
            let _ = tx.send(elapsed);
        });
        assert!(timer.is_armed());

        let elapsed = rx.await.unwrap();
        assert!(elapsed >= Duration::from_millis(350));
        assert!(!timer.is_armed());
        assert!(!timer.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_action() {
        let timer = ClickTimer::new(Duration::from_millis(350));
        let (count, action) = counter();

        timer.start(action);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_pending_wait() {
        let timer = ClickTimer::new(Duration::from_millis(600));
        let (first, first_action) = counter();
        let (second, second_action) = counter();

        timer.start(first_action);
        tokio::time::sleep(Duration::from_millis(400)).await;
        timer.start(second_action);

        // The first deadline passes without effect.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_never_started() {
        let timer = ClickTimer::new(Duration::from_millis(10));
        assert!(!timer.is_armed());
        assert!(!timer.cancel());
    }
}
