//! Time source and window arithmetic.
//!
//! All timestamps are wall-clock milliseconds as `i64`, the same unit
//! `chrono::Local::now().timestamp_millis()` yields.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// A source of "now" in milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by `chrono`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_millis(&self) -> i64 {
        chrono::Local::now().timestamp_millis()
    }
}

static SYSTEM_CLOCK: Lazy<Arc<dyn Clock>> = Lazy::new(|| Arc::new(SystemClock));

/// Returns the process-wide shared wall clock.
#[inline]
pub fn system_clock() -> Arc<dyn Clock> {
    SYSTEM_CLOCK.clone()
}

/// A clock that only moves when told to. Used for simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    #[inline]
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the clock forward by `millis` and returns the new time.
    #[inline]
    pub fn advance(&self, millis: i64) -> i64 {
        self.now.fetch_add(millis, Ordering::SeqCst) + millis
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Start of the window of length `window_length` that contains `time`, or
/// `None` if that start is not representable.
#[inline]
pub fn window_start_of(time: i64, window_length: i64) -> Option<i64> {
    time.checked_sub(time.rem_euclid(window_length))
}

/// Array cell that the window containing `time` hashes to.
#[inline]
pub fn window_index_of(time: i64, window_length: i64, sample_count: usize) -> usize {
    time.div_euclid(window_length).rem_euclid(sample_count as i64) as usize
}
