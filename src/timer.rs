//! Tracked call timers
//!
//! Each pending call may hold a connect timer or a response timer. Timers are
//! spawned through a `TimerRegistry`, which keeps counts of how many of each
//! kind were armed and how many are live right now. A live timer either fires
//! or is cleared, never both.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Which phase of a pending call a timer bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Waiting for the transport to report ready
    Connect,
    /// Waiting for the transport to answer a forwarded call
    Response,
}

#[derive(Debug, Default)]
struct Counters {
    connect_armed: AtomicUsize,
    response_armed: AtomicUsize,
    active: AtomicUsize,
}

/// Spawns timers and tracks their lifecycle.
#[derive(Debug, Clone, Default)]
pub struct TimerRegistry {
    counters: Arc<Counters>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer that runs `on_fire` after `after`, unless cleared first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&self, kind: TimerKind, after: Duration, on_fire: F) -> Timer
    where
        F: FnOnce() + Send + 'static,
    {
        let armed = match kind {
            TimerKind::Connect => &self.counters.connect_armed,
            TimerKind::Response => &self.counters.response_armed,
        };
        armed.fetch_add(1, Ordering::SeqCst);
        self.counters.active.fetch_add(1, Ordering::SeqCst);

        let live = Arc::new(AtomicBool::new(true));
        let task_live = Arc::clone(&live);
        let counters = Arc::clone(&self.counters);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if task_live.swap(false, Ordering::SeqCst) {
                counters.active.fetch_sub(1, Ordering::SeqCst);
                trace!(?kind, "Timer fired");
                on_fire();
            }
        });

        Timer {
            kind,
            live,
            handle,
            counters: Arc::clone(&self.counters),
        }
    }

    /// Timers currently armed and neither fired nor cleared.
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Total timers of `kind` ever armed through this registry.
    pub fn armed(&self, kind: TimerKind) -> usize {
        match kind {
            TimerKind::Connect => self.counters.connect_armed.load(Ordering::SeqCst),
            TimerKind::Response => self.counters.response_armed.load(Ordering::SeqCst),
        }
    }
}

/// A live timer. Dropping it clears it.
#[derive(Debug)]
pub struct Timer {
    kind: TimerKind,
    live: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl Timer {
    /// Clear the timer. Returns true if it had not fired yet.
    pub fn clear(self) -> bool {
        self.disarm()
    }

    fn disarm(&self) -> bool {
        self.handle.abort();
        if self.live.swap(false, Ordering::SeqCst) {
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
            trace!(kind = ?self.kind, "Timer cleared");
            true
        } else {
            false
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);

        let timer = registry.arm(TimerKind::Connect, Duration::from_millis(100), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.active(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active(), 0);

        // Clearing after it fired is a no-op
        assert!(!timer.clear());
        assert_eq!(registry.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_timer_never_fires() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);

        let timer = registry.arm(TimerKind::Response, Duration::from_millis(50), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.clear());
        assert_eq!(registry.active(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(registry.armed(TimerKind::Response), 1);
        assert_eq!(registry.armed(TimerKind::Connect), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_clears() {
        let registry = TimerRegistry::new();
        {
            let _timer = registry.arm(TimerKind::Connect, Duration::from_secs(5), || {});
            assert_eq!(registry.active(), 1);
        }
        assert_eq!(registry.active(), 0);
    }
}
