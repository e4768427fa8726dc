use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::temporal::Timestamp;

/// Source of wall-clock time.
///
/// Components take a clock instead of calling [`Timestamp::now`] so that
/// vote windows and cache expiry can be exercised deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Used by tests and the simulator.
#[derive(Debug, Default)]
pub struct ManualClock {
    ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            ms: AtomicU64::new(start.as_millis()),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        self.ms.store(ts.as_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, d: Duration) {
        self.ms.fetch_add(d.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.ms.load(Ordering::SeqCst))
    }
}

/// Hybrid clock producing strictly increasing [`Timestamp`]s.
///
/// Follows the local-event rule of a hybrid logical clock with the logical
/// counter folded into the millisecond component:
/// `next = max(wall_clock, last + 1ms)`. Submission stamps drawn from one
/// clock are therefore totally ordered even when several votes land in the
/// same millisecond, which is what last-write-wins needs.
pub struct HybridClock {
    source: Arc<dyn Clock>,
    last_ms: Mutex<u64>,
}

impl HybridClock {
    pub fn new(source: Arc<dyn Clock>) -> Self {
        Self {
            source,
            last_ms: Mutex::new(0),
        }
    }

    /// Next stamp, strictly greater than every stamp returned before.
    pub fn tick(&self) -> Timestamp {
        let wall = self.source.now().as_millis();
        let mut last = self.last_ms.lock().unwrap_or_else(PoisonError::into_inner);
        let next = wall.max(last.saturating_add(1));
        *last = next;
        Timestamp::from_millis(next)
    }

    /// Fold in a stamp observed elsewhere (e.g. recovered from a log) so that
    /// later ticks stay ahead of it.
    pub fn observe(&self, seen: Timestamp) {
        let mut last = self.last_ms.lock().unwrap_or_else(PoisonError::into_inner);
        *last = (*last).max(seen.as_millis());
    }
}

impl std::fmt::Debug for HybridClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last = *self.last_ms.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("HybridClock").field("last_ms", &last).finish()
    }
}
