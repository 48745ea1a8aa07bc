use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::bucket::MetricBucket;

/// Tag of a cell that has never held a window.
pub(crate) const EMPTY: i64 = i64::MIN;
/// Tag of a cell whose bucket is being reset by the takeover winner.
pub(crate) const RESETTING: i64 = i64::MIN + 1;

/// One cell of a [`crate::LeapArray`].
///
/// The `window_start` tag is the slot's identity. A takeover swaps the tag for
/// `RESETTING`, resets the bucket and then publishes the new start with release
/// ordering, so anyone who acquires the new tag sees a clean bucket. Starts at
/// or below `RESETTING` are never published.
pub struct WindowSlot {
    window_start: AtomicI64,
    bucket: MetricBucket,
}

impl WindowSlot {
    pub(crate) fn new(max_rt: u64) -> Self {
        Self {
            window_start: AtomicI64::new(EMPTY),
            bucket: MetricBucket::new(max_rt),
        }
    }

    /// Raw identity tag, possibly `EMPTY` or `RESETTING`.
    #[inline]
    pub(crate) fn tag(&self) -> i64 {
        self.window_start.load(Ordering::Acquire)
    }

    /// The window this slot currently represents, if it has a published one.
    #[inline]
    pub fn window_start(&self) -> Option<i64> {
        match self.tag() {
            EMPTY | RESETTING => None,
            start => Some(start),
        }
    }

    #[inline]
    pub fn bucket(&self) -> &MetricBucket {
        &self.bucket
    }

    /// Attempts to move the slot from the `observed` identity to `new_start`.
    ///
    /// Returns `false` if another caller changed the tag first. The winner
    /// zeroes the bucket before publishing `new_start`.
    pub(crate) fn take_over(&self, observed: i64, new_start: i64) -> bool {
        if self
            .window_start
            .compare_exchange(observed, RESETTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.bucket.reset();
        self.window_start.store(new_start, Ordering::Release);
        true
    }

    #[inline]
    pub(crate) fn wrap(&self, window_start: i64, window_length: i64) -> WindowWrap<'_> {
        WindowWrap {
            window_start,
            window_length,
            bucket: &self.bucket,
        }
    }
}

impl fmt::Debug for WindowSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("WindowSlot");
        match self.tag() {
            EMPTY => s.field("window_start", &"empty"),
            RESETTING => s.field("window_start", &"resetting"),
            start => s.field("window_start", &start),
        };
        s.field("bucket", &self.bucket).finish()
    }
}

/// A window identity paired with the bucket that holds its counters.
#[derive(Clone, Copy)]
pub struct WindowWrap<'a> {
    window_start: i64,
    window_length: i64,
    bucket: &'a MetricBucket,
}

impl<'a> WindowWrap<'a> {
    #[inline]
    pub fn window_start(&self) -> i64 {
        self.window_start
    }

    #[inline]
    pub fn window_length(&self) -> i64 {
        self.window_length
    }

    #[inline]
    pub fn value(&self) -> &'a MetricBucket {
        self.bucket
    }

    #[inline]
    pub fn is_time_in_window(&self, time: i64) -> bool {
        self.window_start <= time && time < self.window_start.saturating_add(self.window_length)
    }
}

impl fmt::Debug for WindowWrap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowWrap")
            .field("window_start", &self.window_start)
            .field("window_length", &self.window_length)
            .field("value", self.bucket)
            .finish()
    }
}
