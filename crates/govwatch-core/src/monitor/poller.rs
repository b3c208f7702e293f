//! Cancellable interval scheduler
//!
//! A [`Poller`] owns at most one background task. The task invokes the
//! callback immediately on start and then once per interval until
//! [`Poller::stop`] is called. Invocations never overlap: a tick that comes
//! due while the callback is still running is skipped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Poller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// No timer active
    Idle,
    /// Timer active
    Running,
}

/// Interval-driven callback scheduler
pub struct Poller {
    name: String,
    jitter: Duration,
    handle: Mutex<Option<CancellationToken>>,
    ticks: Arc<AtomicU64>,
}

impl Poller {
    /// Create an idle poller
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jitter: Duration::ZERO,
            handle: Mutex::new(None),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Add a random delay of up to `jitter` before each scheduled invocation
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Start polling. Returns `false` (and logs) if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, every: Duration, mut callback: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            warn!(poller = %self.name, "Poller already running, ignoring start");
            return false;
        }

        let token = CancellationToken::new();
        *handle = Some(token.clone());
        drop(handle);

        let name = self.name.clone();
        let jitter = self.jitter;
        let ticks = self.ticks.clone();

        debug!(poller = %name, interval_ms = every.as_millis() as u64, "Poller started");

        tokio::spawn(async move {
            // interval() panics on a zero period
            let mut ticker = interval(every.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !jitter.is_zero() {
                    let delay = rand::thread_rng().gen_range(Duration::ZERO..=jitter);
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                if token.is_cancelled() {
                    break;
                }

                ticks.fetch_add(1, Ordering::Relaxed);
                // Runs to completion even if stop() is called meanwhile
                callback().await;
            }

            debug!(poller = %name, "Poller task exited");
        });

        true
    }

    /// Stop polling. Idempotent.
    ///
    /// The timer is released at once, but an invocation that was already
    /// starting on another worker may still run. Callbacks check their own
    /// liveness flag before acting on results.
    pub fn stop(&self) {
        if let Some(token) = self.handle.lock().take() {
            token.cancel();
            debug!(poller = %self.name, "Poller stopped");
        }
    }

    /// Current state
    pub fn state(&self) -> PollerState {
        if self.handle.lock().is_some() {
            PollerState::Running
        } else {
            PollerState::Idle
        }
    }

    /// Whether a timer is active
    pub fn is_running(&self) -> bool {
        self.state() == PollerState::Running
    }

    /// Number of callback invocations started so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("ticks", &self.ticks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting() -> (Arc<AtomicU64>, impl FnMut() -> futures::future::Ready<()> + Send + 'static) {
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_invokes_immediately_then_on_interval() {
        let poller = Poller::new("test");
        let (count, callback) = counting();

        assert!(poller.start(Duration::from_secs(2), callback));
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);

        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_running_is_noop() {
        let poller = Poller::new("test");
        let (count, first) = counting();
        let (other, second) = counting();

        assert!(poller.start(Duration::from_secs(1), first));
        assert!(!poller.start(Duration::from_secs(1), second));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(other.load(Ordering::SeqCst), 0);

        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_halts_invocations() {
        let poller = Poller::new("test");
        let (count, callback) = counting();

        poller.start(Duration::from_secs(1), callback);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(poller.state(), PollerState::Running);

        poller.stop();
        poller.stop();
        assert_eq!(poller.state(), PollerState::Idle);

        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_stop_on_idle_poller() {
        let poller = Poller::new("idle");
        poller.stop();
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let poller = Poller::new("test");
        let (count, first) = counting();
        poller.start(Duration::from_secs(1), first);
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.stop();

        let (_, second) = counting();
        assert!(poller.start(Duration::from_secs(1), second));
        assert!(poller.is_running());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_callback_does_not_overlap() {
        let poller = Poller::new("slow");
        let running = Arc::new(AtomicU64::new(0));
        let max_seen = Arc::new(AtomicU64::new(0));

        let (r, m) = (running.clone(), max_seen.clone());
        poller.start(Duration::from_millis(100), move || {
            let (r, m) = (r.clone(), m.clone());
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(350)).await;
                r.fetch_sub(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        poller.stop();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
