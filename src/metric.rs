use std::fmt;
use std::sync::Arc;

use log::{debug, info};

use crate::bucket::{MetricBucket, MetricEvent};
use crate::clock::{system_clock, window_start_of, Clock};
use crate::error::{Error, Result};
use crate::leap_array::LeapArray;
use crate::node::MetricNode;
use crate::Config;

/// Rolling statistics of one monitored resource.
///
/// Writers record events into the window containing "now"; readers fold the
/// windows still inside the interval. Every method may be called from any
/// thread at any rate.
pub struct ArrayMetric {
    data: LeapArray,
    clock: Arc<dyn Clock>,
    occupy_timeout: i64,
    max_rt: u64,
}

impl ArrayMetric {
    /// Creates a metric reading the shared wall clock.
    pub fn new(cfg: Config) -> Result<Self> {
        Self::with_clock(cfg, system_clock())
    }

    pub fn with_clock(cfg: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let data = LeapArray::from_config(&cfg)?;
        let occupy_timeout = i64::from(cfg.occupy_timeout_ms).min(data.interval_ms() - 1);
        info!(
            "new array metric, sample_count: {}, interval: {}ms, window_length: {}ms, occupiable: {}",
            data.sample_count(),
            data.interval_ms(),
            data.window_length_ms(),
            data.is_occupiable()
        );
        Ok(Self {
            data,
            clock,
            occupy_timeout,
            max_rt: cfg.statistic_max_rt,
        })
    }

    #[inline]
    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    #[inline]
    pub fn leap_array(&self) -> &LeapArray {
        &self.data
    }

    #[inline]
    pub fn sample_count(&self) -> usize {
        self.data.sample_count()
    }

    #[inline]
    pub fn interval_ms(&self) -> i64 {
        self.data.interval_ms()
    }

    #[inline]
    pub fn interval_secs(&self) -> f64 {
        self.data.interval_secs()
    }

    #[inline]
    pub fn window_length_ms(&self) -> i64 {
        self.data.window_length_ms()
    }

    #[inline]
    pub fn is_occupiable(&self) -> bool {
        self.data.is_occupiable()
    }

    /// Records `count` events of kind `event` into the current window.
    ///
    /// A negative `count` is rejected. If the clock went backwards the write is
    /// dropped and `Ok(())` is returned.
    pub fn add(&self, event: MetricEvent, count: i64) -> Result<()> {
        let n = non_negative(count)?;
        let now = self.now();
        match self.data.current_window(now) {
            Some(wrap) => {
                if event == MetricEvent::Rt {
                    wrap.value().add_rt(n);
                } else {
                    wrap.value().add(event, n);
                }
            }
            None => debug!("dropped {:?} +{} at {}", event, n, now),
        }
        Ok(())
    }

    #[inline]
    pub fn add_pass(&self, count: i64) -> Result<()> {
        self.add(MetricEvent::Pass, count)
    }

    #[inline]
    pub fn add_block(&self, count: i64) -> Result<()> {
        self.add(MetricEvent::Block, count)
    }

    #[inline]
    pub fn add_success(&self, count: i64) -> Result<()> {
        self.add(MetricEvent::Success, count)
    }

    #[inline]
    pub fn add_exception(&self, count: i64) -> Result<()> {
        self.add(MetricEvent::Exception, count)
    }

    /// Adds `rt` to the response-time sum and to the window minimum.
    #[inline]
    pub fn add_rt(&self, rt: i64) -> Result<()> {
        self.add(MetricEvent::Rt, rt)
    }

    /// Admits `count` requests early against the window containing `future_time`.
    ///
    /// The occupied passes and the matching waiting quota are both recorded in
    /// that future window. Once it starts they count as passes of that window
    /// and stop counting as waiting, whether or not anything else touches it.
    pub fn add_occupied_pass(&self, future_time: i64, count: i64) -> Result<()> {
        let n = non_negative(count)?;
        if let Some(bucket) = self.future_bucket(future_time)? {
            bucket.add(MetricEvent::OccupiedPass, n);
            bucket.add_waiting(n);
        }
        Ok(())
    }

    /// Reserves `count` of the capacity of the window containing `future_time`
    /// without admitting anything yet.
    pub fn add_waiting(&self, future_time: i64, count: i64) -> Result<()> {
        let n = non_negative(count)?;
        if let Some(bucket) = self.future_bucket(future_time)? {
            bucket.add_waiting(n);
        }
        Ok(())
    }

    /// Resolves the borrow bucket for `future_time`.
    ///
    /// The target window must start after "now" and `future_time` must lie
    /// within the occupy timeout. `Ok(None)` means the write is dropped.
    fn future_bucket(&self, future_time: i64) -> Result<Option<&MetricBucket>> {
        let borrow = self.data.borrow_array().ok_or(Error::OccupyDisabled)?;
        let now = self.now();
        let out_of_range = Error::FutureWindowOutOfRange {
            now,
            target: future_time,
            horizon: self.occupy_timeout,
        };
        match future_time.checked_sub(now) {
            Some(ahead) if ahead > 0 && ahead <= self.occupy_timeout => {}
            _ => return Err(out_of_range),
        }
        match window_start_of(future_time, self.window_length_ms()) {
            Some(start) if start > now => {}
            _ => return Err(out_of_range),
        }
        match borrow.current_window(future_time) {
            Some(wrap) => Ok(Some(wrap.value())),
            None => {
                debug!("dropped reservation for {} at {}", future_time, now);
                Ok(None)
            }
        }
    }

    /// Every bucket contributing to the rolling totals at `now`: the live
    /// windows plus the borrowed windows that have started.
    fn live_buckets(&self, now: i64) -> impl Iterator<Item = &MetricBucket> + '_ {
        self.data
            .values(now)
            .chain(self.data.realized(now).map(|wrap| wrap.value()))
    }

    /// Sum of `event` over the live interval. Occupied passes whose window has
    /// started count toward `Pass` as well.
    pub fn get_sum(&self, event: MetricEvent) -> u64 {
        let now = self.now();
        self.live_buckets(now).map(|bucket| count_of(bucket, event)).sum()
    }

    /// Per-second average of `event` over the live interval.
    pub fn get_avg(&self, event: MetricEvent) -> f64 {
        self.get_sum(event) as f64 / self.interval_secs()
    }

    #[inline]
    pub fn pass(&self) -> u64 {
        self.get_sum(MetricEvent::Pass)
    }

    #[inline]
    pub fn block(&self) -> u64 {
        self.get_sum(MetricEvent::Block)
    }

    #[inline]
    pub fn success(&self) -> u64 {
        self.get_sum(MetricEvent::Success)
    }

    #[inline]
    pub fn exception(&self) -> u64 {
        self.get_sum(MetricEvent::Exception)
    }

    #[inline]
    pub fn occupied_pass(&self) -> u64 {
        self.get_sum(MetricEvent::OccupiedPass)
    }

    /// Sum of response times over the live interval.
    #[inline]
    pub fn rt(&self) -> u64 {
        self.get_sum(MetricEvent::Rt)
    }

    /// Average response time per successful request, `0.0` without successes.
    pub fn avg_rt(&self) -> f64 {
        let success = self.success();
        if success == 0 {
            return 0.0;
        }
        self.rt() as f64 / success as f64
    }

    /// Smallest response time seen in the live interval, at least 1.
    ///
    /// Without any recorded response time this is the statistic ceiling.
    pub fn min_rt(&self) -> u64 {
        self.data
            .values(self.now())
            .map(MetricBucket::min_rt)
            .fold(self.max_rt, u64::min)
            .max(1)
    }

    /// Largest per-window success count in the live interval, at least 1.
    pub fn max_success(&self) -> u64 {
        self.data
            .values(self.now())
            .map(MetricBucket::success)
            .max()
            .unwrap_or(0)
            .max(1)
    }

    /// Pass count of the window containing `time`, or 0 if that window is gone.
    pub fn window_pass(&self, time: i64) -> u64 {
        self.window_get(self.now(), time, MetricEvent::Pass)
    }

    pub fn previous_window_pass(&self) -> u64 {
        self.previous_window_get(MetricEvent::Pass)
    }

    pub fn previous_window_block(&self) -> u64 {
        self.previous_window_get(MetricEvent::Block)
    }

    fn previous_window_get(&self, event: MetricEvent) -> u64 {
        let now = self.now();
        match now.checked_sub(self.window_length_ms()) {
            Some(time) => self.window_get(now, time, event),
            None => 0,
        }
    }

    fn window_get(&self, now: i64, time: i64, event: MetricEvent) -> u64 {
        self.data
            .live_value(now, time)
            .into_iter()
            .chain(self.data.realized_value(now, time))
            .map(|bucket| count_of(bucket, event))
            .sum()
    }

    /// Quota reserved for windows that have not started yet.
    pub fn waiting(&self) -> u64 {
        self.data.current_waiting(self.now())
    }

    /// One record per live window, ordered by window start. Read-only.
    pub fn details(&self) -> Vec<MetricNode> {
        self.details_by(|_| true)
    }

    /// Like [`details`](Self::details), keeping windows whose start satisfies `predicate`.
    pub fn details_by<P>(&self, mut predicate: P) -> Vec<MetricNode>
    where
        P: FnMut(i64) -> bool,
    {
        let now = self.now();
        let mut details: Vec<MetricNode> = Vec::with_capacity(self.sample_count());
        for wrap in self.data.list(now).chain(self.data.realized(now)) {
            if !predicate(wrap.window_start()) {
                continue;
            }
            let node = MetricNode::from_window(&wrap);
            match details.iter_mut().find(|n| n.timestamp == node.timestamp) {
                Some(existing) => existing.merge(&node),
                None => details.push(node),
            }
        }
        details.sort_by_key(|node| node.timestamp);
        details
    }
}

impl fmt::Debug for ArrayMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayMetric")
            .field("data", &self.data)
            .field("occupy_timeout", &self.occupy_timeout)
            .finish()
    }
}

/// Occupied passes are admissions too, so they join `Pass`.
#[inline]
fn count_of(bucket: &MetricBucket, event: MetricEvent) -> u64 {
    match event {
        MetricEvent::Pass => bucket.pass() + bucket.occupied_pass(),
        event => bucket.get(event),
    }
}

#[inline]
fn non_negative(count: i64) -> Result<u64> {
    u64::try_from(count).map_err(|_| Error::NegativeCount(count))
}
