use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Default ceiling reported by `min_rt` when nothing has been recorded, in milliseconds.
pub const DEFAULT_STATISTIC_MAX_RT: u64 = 5000;

/// The kinds of events counted per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricEvent {
    /// Admitted.
    Pass,
    /// Rejected by flow control.
    Block,
    /// Completed with a business exception.
    Exception,
    /// Completed.
    Success,
    /// Response time, summed.
    Rt,
    /// Admitted early against a future window's capacity.
    OccupiedPass,
}

impl MetricEvent {
    pub const ALL: [MetricEvent; 6] = [
        MetricEvent::Pass,
        MetricEvent::Block,
        MetricEvent::Exception,
        MetricEvent::Success,
        MetricEvent::Rt,
        MetricEvent::OccupiedPass,
    ];

    #[inline]
    const fn index(self) -> usize {
        match self {
            MetricEvent::Pass => 0,
            MetricEvent::Block => 1,
            MetricEvent::Exception => 2,
            MetricEvent::Success => 3,
            MetricEvent::Rt => 4,
            MetricEvent::OccupiedPass => 5,
        }
    }
}

/// Counters accumulated during a single window.
///
/// Every counter is an independent atomic, so concurrent `add`s never lose
/// updates. A bucket is allocated once per array cell and zeroed in place with
/// [`MetricBucket::reset`] whenever its cell is recycled for a newer window.
pub struct MetricBucket {
    counters: [AtomicU64; 6],
    min_rt: AtomicU64,
    waiting: AtomicU64,
    max_rt: u64,
}

impl MetricBucket {
    pub fn new(max_rt: u64) -> Self {
        Self {
            counters: Default::default(),
            min_rt: AtomicU64::new(max_rt),
            waiting: AtomicU64::new(0),
            max_rt,
        }
    }

    /// Zeroes all counters. Only the thread that won a window takeover calls this.
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.min_rt.store(self.max_rt, Ordering::Relaxed);
        self.waiting.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, event: MetricEvent, n: u64) -> &Self {
        self.counters[event.index()].fetch_add(n, Ordering::Relaxed);
        self
    }

    #[inline]
    pub fn get(&self, event: MetricEvent) -> u64 {
        self.counters[event.index()].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn pass(&self) -> u64 {
        self.get(MetricEvent::Pass)
    }

    #[inline]
    pub fn block(&self) -> u64 {
        self.get(MetricEvent::Block)
    }

    #[inline]
    pub fn exception(&self) -> u64 {
        self.get(MetricEvent::Exception)
    }

    #[inline]
    pub fn success(&self) -> u64 {
        self.get(MetricEvent::Success)
    }

    #[inline]
    pub fn rt(&self) -> u64 {
        self.get(MetricEvent::Rt)
    }

    #[inline]
    pub fn occupied_pass(&self) -> u64 {
        self.get(MetricEvent::OccupiedPass)
    }

    /// Adds to the response-time sum and lowers the window minimum if `rt` beats it.
    #[inline]
    pub fn add_rt(&self, rt: u64) {
        self.add(MetricEvent::Rt, rt);
        self.min_rt.fetch_min(rt, Ordering::Relaxed);
    }

    #[inline]
    pub fn min_rt(&self) -> u64 {
        self.min_rt.load(Ordering::Relaxed)
    }

    /// Quota reserved against this window before it started.
    #[inline]
    pub fn add_waiting(&self, n: u64) {
        self.waiting.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn waiting(&self) -> u64 {
        self.waiting.load(Ordering::Relaxed)
    }
}

impl Default for MetricBucket {
    fn default() -> Self {
        Self::new(DEFAULT_STATISTIC_MAX_RT)
    }
}

impl fmt::Debug for MetricBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricBucket")
            .field("pass", &self.pass())
            .field("block", &self.block())
            .field("exception", &self.exception())
            .field("success", &self.success())
            .field("rt", &self.rt())
            .field("min_rt", &self.min_rt())
            .field("occupied_pass", &self.occupied_pass())
            .field("waiting", &self.waiting())
            .finish()
    }
}
