//! Stub counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters, bumped with relaxed ordering.
#[derive(Debug, Default)]
pub struct StubStats {
    /// Readiness wake-ups seen by the polling loop.
    pub wakeups: AtomicU64,
    /// Slots claimed and handed to `make_req`.
    pub dispatched: AtomicU64,
    /// Requests the engine refused synchronously.
    pub rejected: AtomicU64,
    /// Requests retired through `end_req`.
    pub completed: AtomicU64,
    /// Wake-ups that found nothing to dispatch.
    pub anomalous_wakes: AtomicU64,
    /// Slots found carrying an unrecognized tag.
    pub unknown_tags: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub wakeups: u64,
    pub dispatched: u64,
    pub rejected: u64,
    pub completed: u64,
    pub anomalous_wakes: u64,
    pub unknown_tags: u64,
}

impl StubStats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            wakeups: self.wakeups.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            anomalous_wakes: self.anomalous_wakes.load(Ordering::Relaxed),
            unknown_tags: self.unknown_tags.load(Ordering::Relaxed),
        }
    }
}
