//! A fixed ring of time windows, recycled lazily as the clock moves on.
//!
//! `LeapArray` splits an interval of `interval_ms` into `sample_count` windows
//! of equal length. The window containing `t` lives at cell
//! `(t / window_length) % sample_count`; when a newer window hashes onto a cell
//! still holding an older one, exactly one caller wins the takeover and resets
//! the cell in place. Nothing is allocated after construction.
//!
//! Two retention kinds exist. `Past` is the normal rolling statistic: a window
//! counts while it is younger than the interval. `Future` backs the quota
//! borrowed by occupied passes: a window counts as waiting only while it has
//! not started. Once a borrowed window has started it is read back through
//! the owning array's `Past` rule, so reservations join the rolling totals
//! without anyone having to claim the window.

use std::fmt;

use log::{debug, warn};

use crate::bucket::{MetricBucket, DEFAULT_STATISTIC_MAX_RT};
use crate::clock::{window_index_of, window_start_of};
use crate::error::{Error, Result};
use crate::window::{WindowSlot, WindowWrap, RESETTING};
use crate::Config;

/// Busy-spins before a takeover loser starts yielding.
const SPIN_LIMIT: u32 = 64;
/// Total rounds a loser waits on a takeover before dropping its request.
const WAIT_LIMIT: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Windows are live while `now - start <= interval`.
    Past,
    /// Windows are live while `start > now`.
    Future,
}

pub struct LeapArray {
    slots: Box<[WindowSlot]>,
    window_length: i64,
    interval: i64,
    retention: Retention,
    borrow: Option<Box<LeapArray>>,
}

impl LeapArray {
    /// Creates a rolling array with `sample_count` windows over `interval_ms`.
    pub fn new(sample_count: u32, interval_ms: u32) -> Result<Self> {
        Self::build(
            sample_count,
            interval_ms,
            DEFAULT_STATISTIC_MAX_RT,
            Retention::Past,
            None,
        )
    }

    /// Creates an array that only keeps windows which have not started yet.
    pub fn future(sample_count: u32, interval_ms: u32) -> Result<Self> {
        Self::build(
            sample_count,
            interval_ms,
            DEFAULT_STATISTIC_MAX_RT,
            Retention::Future,
            None,
        )
    }

    /// Creates a rolling array from `cfg`. An occupiable config also gets a
    /// borrow array holding quota reserved for windows that have not started.
    ///
    /// The borrow array spans twice the interval, so a reservation never
    /// shares a cell with a borrowed window that is still inside the interval.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        cfg.validate()?;
        let borrow = if cfg.occupiable {
            let sample_count = cfg
                .sample_count
                .checked_mul(2)
                .ok_or(Error::InvalidSampleCount(cfg.sample_count))?;
            let interval_ms = cfg
                .interval_ms
                .checked_mul(2)
                .ok_or(Error::InvalidInterval(cfg.interval_ms))?;
            Some(Box::new(Self::build(
                sample_count,
                interval_ms,
                cfg.statistic_max_rt,
                Retention::Future,
                None,
            )?))
        } else {
            None
        };
        Self::build(
            cfg.sample_count,
            cfg.interval_ms,
            cfg.statistic_max_rt,
            Retention::Past,
            borrow,
        )
    }

    fn build(
        sample_count: u32,
        interval_ms: u32,
        max_rt: u64,
        retention: Retention,
        borrow: Option<Box<LeapArray>>,
    ) -> Result<Self> {
        Config::check_geometry(sample_count, interval_ms)?;
        let slots = (0..sample_count)
            .map(|_| WindowSlot::new(max_rt))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            slots,
            window_length: i64::from(interval_ms / sample_count),
            interval: i64::from(interval_ms),
            retention,
            borrow,
        })
    }

    #[inline]
    pub fn sample_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn interval_ms(&self) -> i64 {
        self.interval
    }

    #[inline]
    pub fn interval_secs(&self) -> f64 {
        self.interval as f64 / 1000.0
    }

    #[inline]
    pub fn window_length_ms(&self) -> i64 {
        self.window_length
    }

    #[inline]
    pub fn retention(&self) -> Retention {
        self.retention
    }

    #[inline]
    pub fn is_occupiable(&self) -> bool {
        self.borrow.is_some()
    }

    /// The array holding quota reserved ahead of time, if occupy is enabled.
    #[inline]
    pub fn borrow_array(&self) -> Option<&LeapArray> {
        self.borrow.as_deref()
    }

    /// Start of the window containing `time`, if it is a publishable tag.
    #[inline]
    fn start_of(&self, time: i64) -> Option<i64> {
        window_start_of(time, self.window_length).filter(|start| *start > RESETTING)
    }

    #[inline]
    fn slot_for(&self, time: i64) -> &WindowSlot {
        &self.slots[window_index_of(time, self.window_length, self.slots.len())]
    }

    /// Returns the window containing `now`, claiming or recycling its cell if
    /// needed.
    ///
    /// Returns `None` when the cell already holds a newer window than `now`
    /// (the clock went backwards), when `now` is too close to `i64::MIN` to
    /// have a window, or when a concurrent takeover did not finish within the
    /// wait bound. Either way the caller must drop its write.
    pub fn current_window(&self, now: i64) -> Option<WindowWrap<'_>> {
        let start = self.start_of(now)?;
        let slot = self.slot_for(now);
        let mut rounds = 0u32;
        loop {
            match slot.tag() {
                RESETTING => {}
                tag if tag == start => return Some(slot.wrap(start, self.window_length)),
                tag if tag < start => {
                    if slot.take_over(tag, start) {
                        return Some(slot.wrap(start, self.window_length));
                    }
                }
                tag => {
                    debug!(
                        "clock regression, now: {}, window_start: {}, slot holds: {}",
                        now, start, tag
                    );
                    return None;
                }
            }
            rounds += 1;
            if rounds >= WAIT_LIMIT {
                warn!(
                    "window takeover did not settle, now: {}, window_start: {}",
                    now, start
                );
                return None;
            }
            if rounds < SPIN_LIMIT {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// The window just before the one containing `now`, if its cell still
    /// holds it and it has not expired.
    pub fn previous_window(&self, now: i64) -> Option<WindowWrap<'_>> {
        let time = now.checked_sub(self.window_length)?;
        let start = self.start_of(time)?;
        let slot = self.slot_for(time);
        match slot.window_start() {
            Some(tag) if tag == start && !self.is_window_deprecated(now, tag) => {
                Some(slot.wrap(tag, self.window_length))
            }
            _ => None,
        }
    }

    /// Bucket of the window containing `time`, if its cell currently holds
    /// exactly that window. Expiry is not considered.
    pub fn window_value(&self, time: i64) -> Option<&MetricBucket> {
        let start = self.start_of(time)?;
        let slot = self.slot_for(time);
        match slot.window_start() {
            Some(tag) if tag == start => Some(slot.bucket()),
            _ => None,
        }
    }

    #[inline]
    pub fn is_window_deprecated(&self, now: i64, window_start: i64) -> bool {
        match self.retention {
            Retention::Past => {
                window_start > now || now.saturating_sub(window_start) > self.interval
            }
            Retention::Future => now >= window_start,
        }
    }

    /// Every published window that is live relative to `now`, in cell order.
    pub fn list(&self, now: i64) -> impl Iterator<Item = WindowWrap<'_>> + '_ {
        self.list_all()
            .filter(move |wrap| !self.is_window_deprecated(now, wrap.window_start()))
    }

    /// Every published window, live or not.
    pub fn list_all(&self) -> impl Iterator<Item = WindowWrap<'_>> + '_ {
        self.slots.iter().filter_map(move |slot| {
            slot.window_start()
                .map(|start| slot.wrap(start, self.window_length))
        })
    }

    /// Buckets of the live windows. Aggregation over these is a commutative
    /// fold, so the order is unspecified.
    pub fn values(&self, now: i64) -> impl Iterator<Item = &MetricBucket> + '_ {
        self.list(now).map(|wrap| wrap.value())
    }

    /// Like [`window_value`](Self::window_value), but `None` once the window
    /// is no longer live relative to `now`.
    pub fn live_value(&self, now: i64, time: i64) -> Option<&MetricBucket> {
        let start = self.start_of(time)?;
        if self.is_window_deprecated(now, start) {
            return None;
        }
        self.window_value(time)
    }

    /// Borrowed windows that have started and are still inside this array's
    /// interval. Their counters belong to the rolling totals alongside
    /// [`list`](Self::list), whether or not the window was ever claimed here.
    pub fn realized(&self, now: i64) -> impl Iterator<Item = WindowWrap<'_>> + '_ {
        self.borrow
            .iter()
            .flat_map(|borrow| borrow.list_all())
            .filter(move |wrap| !self.is_window_deprecated(now, wrap.window_start()))
    }

    /// The borrowed bucket for the window containing `time`, if that window has
    /// started and is still live relative to `now`.
    pub fn realized_value(&self, now: i64, time: i64) -> Option<&MetricBucket> {
        let start = self.start_of(time)?;
        if self.is_window_deprecated(now, start) {
            return None;
        }
        self.borrow.as_ref()?.window_value(time)
    }

    /// Quota reserved in the borrow array for windows that have not started yet.
    pub fn current_waiting(&self, now: i64) -> u64 {
        self.borrow
            .as_ref()
            .map(|borrow| borrow.values(now).map(MetricBucket::waiting).sum())
            .unwrap_or(0)
    }
}

impl fmt::Debug for LeapArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeapArray")
            .field("sample_count", &self.slots.len())
            .field("interval", &self.interval)
            .field("window_length", &self.window_length)
            .field("retention", &self.retention)
            .field("slots", &self.slots)
            .field("borrow", &self.borrow)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;
    use crate::bucket::MetricEvent;

    fn pass_sum(array: &LeapArray, now: i64) -> u64 {
        array.values(now).map(MetricBucket::pass).sum()
    }

    #[test]
    fn test_geometry() {
        let array = LeapArray::new(4, 1000).unwrap();
        assert_eq!(array.sample_count(), 4);
        assert_eq!(array.window_length_ms(), 250);
        assert_eq!(array.interval_ms(), 1000);
        assert!(!array.is_occupiable());
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert_eq!(
            LeapArray::new(0, 1000).unwrap_err(),
            Error::InvalidSampleCount(0)
        );
        assert_eq!(LeapArray::new(2, 0).unwrap_err(), Error::InvalidInterval(0));
        assert_eq!(
            LeapArray::new(3, 1000).unwrap_err(),
            Error::IntervalNotDivisible {
                interval_ms: 1000,
                sample_count: 3
            }
        );
    }

    #[test]
    fn test_current_window_claims_and_reuses() {
        let array = LeapArray::new(2, 1000).unwrap();
        let w = array.current_window(120).unwrap();
        assert_eq!(w.window_start(), 0);
        w.value().add(MetricEvent::Pass, 1);

        let again = array.current_window(499).unwrap();
        assert_eq!(again.window_start(), 0);
        assert_eq!(again.value().pass(), 1);

        let next = array.current_window(500).unwrap();
        assert_eq!(next.window_start(), 500);
        assert_eq!(next.value().pass(), 0);
    }

    #[test]
    fn test_stale_slot_is_recycled() {
        let array = LeapArray::new(2, 1000).unwrap();
        array.current_window(10).unwrap().value().add(MetricEvent::Pass, 7);
        let w = array.current_window(1010).unwrap();
        assert_eq!(w.window_start(), 1000);
        assert_eq!(w.value().pass(), 0);
        assert_eq!(array.list_all().count(), 1);
    }

    #[test]
    fn test_clock_regression_is_absent() {
        let array = LeapArray::new(2, 1000).unwrap();
        array.current_window(1200).unwrap().value().add(MetricEvent::Pass, 1);
        // 200 hashes onto the same cell but is an older window.
        assert!(array.current_window(200).is_none());
        assert_eq!(array.window_value(1200).unwrap().pass(), 1);
    }

    #[test]
    fn test_values_skip_expired_and_future() {
        let array = LeapArray::new(2, 1000).unwrap();
        array.current_window(0).unwrap().value().add(MetricEvent::Pass, 3);
        array.current_window(600).unwrap().value().add(MetricEvent::Pass, 4);
        assert_eq!(pass_sum(&array, 700), 7);
        assert_eq!(pass_sum(&array, 1200), 4);
        // Looking back before a window started excludes it.
        assert_eq!(pass_sum(&array, 300), 3);
    }

    #[test]
    fn test_previous_window() {
        let array = LeapArray::new(2, 1000).unwrap();
        array.current_window(100).unwrap().value().add(MetricEvent::Block, 2);
        array.current_window(600).unwrap();
        assert!(array.live_value(700, 100).is_some());
        assert!(array.live_value(1200, 100).is_none());

        let prev = array.previous_window(700).unwrap();
        assert_eq!(prev.window_start(), 0);
        assert_eq!(prev.value().block(), 2);

        // Window 500 was never followed by a claimed 1000 window, but it is still the previous one.
        assert_eq!(array.previous_window(1100).unwrap().window_start(), 500);
        assert!(array.previous_window(1600).is_none());
        assert!(array.previous_window(300).is_none());
    }

    #[test]
    fn test_future_retention() {
        let array = LeapArray::future(2, 1000).unwrap();
        array.current_window(1000).unwrap().value().add_waiting(5);
        let waiting = |now| array.values(now).map(MetricBucket::waiting).sum::<u64>();
        assert_eq!(waiting(800), 5);
        assert_eq!(waiting(999), 5);
        assert_eq!(waiting(1000), 0);
    }

    #[test]
    fn test_borrow_array_spans_two_intervals() {
        let cfg = Config {
            occupiable: true,
            ..Default::default()
        };
        let array = LeapArray::from_config(&cfg).unwrap();
        let borrow = array.borrow_array().unwrap();
        assert_eq!(borrow.retention(), Retention::Future);
        assert_eq!(borrow.sample_count(), 4);
        assert_eq!(borrow.interval_ms(), 2000);
        assert_eq!(borrow.window_length_ms(), array.window_length_ms());
    }

    #[test]
    fn test_borrowed_window_read_back_without_claim() {
        let cfg = Config {
            occupiable: true,
            ..Default::default()
        };
        let array = LeapArray::from_config(&cfg).unwrap();
        array.current_window(100).unwrap();
        let borrowed = array.borrow_array().unwrap().current_window(500).unwrap();
        borrowed.value().add(MetricEvent::OccupiedPass, 5);
        borrowed.value().add_waiting(5);

        assert_eq!(array.current_waiting(100), 5);
        assert_eq!(array.realized(100).count(), 0);
        assert!(array.realized_value(100, 500).is_none());

        // Nobody touches window 500 in the main array.
        let realized = array.realized(1100).collect::<Vec<_>>();
        assert_eq!(realized.len(), 1);
        assert_eq!(realized[0].window_start(), 500);
        assert_eq!(realized[0].value().occupied_pass(), 5);
        assert_eq!(array.realized_value(1100, 700).unwrap().occupied_pass(), 5);
        assert_eq!(array.current_waiting(1100), 0);
        assert!(array.window_value(500).is_none());

        // Claiming the window later does not copy the reservation into it.
        assert_eq!(array.current_window(510).unwrap().value().pass(), 0);

        assert_eq!(array.realized(1600).count(), 0);
    }

    #[test]
    fn test_timestamps_near_min_are_absent() {
        let array = LeapArray::new(2, 1000).unwrap();
        assert!(array.current_window(i64::MIN).is_none());
        assert!(array.current_window(i64::MIN + 10).is_none());
        assert!(array.previous_window(i64::MIN).is_none());
        assert!(array.window_value(i64::MIN).is_none());
        assert!(array.live_value(0, i64::MIN).is_none());
        // 512ms windows put a window start exactly on i64::MIN, the empty tag.
        let array = LeapArray::new(2, 1024).unwrap();
        assert!(array.current_window(i64::MIN + 1).is_none());
        assert_eq!(array.list_all().count(), 0);
        assert!(array.is_window_deprecated(i64::MAX, i64::MIN + 2));
    }

    #[test]
    fn test_concurrent_takeover_has_one_winner() {
        let array = LeapArray::new(2, 1000).unwrap();
        array.current_window(0).unwrap().value().add(MetricEvent::Pass, 1000);
        let threads = 8;
        let barrier = Barrier::new(threads);
        std::thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..1000 {
                        let w = array.current_window(1000).unwrap();
                        w.value().add(MetricEvent::Pass, 1);
                    }
                });
            }
        });
        let w = array.current_window(1000).unwrap();
        assert_eq!(w.window_start(), 1000);
        assert_eq!(w.value().pass(), (threads * 1000) as u64);
    }

    #[test]
    fn test_debug_lists_slots() {
        let array = LeapArray::new(2, 1000).unwrap();
        array.current_window(0).unwrap();
        let s = format!("{:?}", array);
        assert!(s.contains("empty"));
        assert!(s.contains("window_start: 0"));
    }
}
