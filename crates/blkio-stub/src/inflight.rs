//! Waitable in-flight counter.
//!
//! The count itself is an atomic so instrumentation reads never block.
//! The mutex/condvar pair exists only so `close` can sleep until the
//! count drains instead of spinning.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

pub struct InflightCounter {
    count: AtomicUsize,
    lock: Mutex<()>,
    zero: Condvar,
}

impl InflightCounter {
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            lock: Mutex::new(()),
            zero: Condvar::new(),
        }
    }

    #[inline]
    pub fn inc(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement; wakes waiters when the count reaches zero.
    pub fn dec(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "in-flight counter underflow");
        if prev == 1 {
            // Taking the lock orders the notify after any waiter's check.
            let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
            self.zero.notify_all();
        }
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Block until the count is zero, logging every `log_interval`.
    pub fn wait_zero(&self, log_interval: Duration) {
        let started = Instant::now();
        let mut guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            let n = self.get();
            if n == 0 {
                return;
            }
            let (g, res) = self
                .zero
                .wait_timeout(guard, log_interval)
                .unwrap_or_else(|p| p.into_inner());
            guard = g;
            if res.timed_out() && self.get() != 0 {
                warn!(
                    inflight = self.get(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "waiting for in-flight requests"
                );
            }
        }
    }
}

impl Default for InflightCounter {
    fn default() -> Self {
        Self::new()
    }
}
