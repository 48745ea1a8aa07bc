use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::window::WindowWrap;

/// Point-in-time statistics of one window, as exported by `ArrayMetric::details`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricNode {
    /// Window start in milliseconds.
    pub timestamp: i64,
    pub pass_qps: u64,
    pub block_qps: u64,
    pub success_qps: u64,
    pub exception_qps: u64,
    /// Average response time of the window, or the raw sum when nothing succeeded.
    pub rt: u64,
    /// Passes admitted ahead of time into this window, already part of `pass_qps`.
    pub occupied_pass_qps: u64,
}

impl MetricNode {
    pub(crate) fn from_window(wrap: &WindowWrap<'_>) -> Self {
        let bucket = wrap.value();
        let success_qps = bucket.success();
        let rt = if success_qps > 0 {
            bucket.rt() / success_qps
        } else {
            bucket.rt()
        };
        Self {
            timestamp: wrap.window_start(),
            pass_qps: bucket.pass() + bucket.occupied_pass(),
            block_qps: bucket.block(),
            success_qps,
            exception_qps: bucket.exception(),
            rt,
            occupied_pass_qps: bucket.occupied_pass(),
        }
    }

    /// Folds another record of the same window into this one.
    pub(crate) fn merge(&mut self, other: &MetricNode) {
        let rt_sum = self.rt * self.success_qps.max(1) + other.rt * other.success_qps.max(1);
        self.pass_qps += other.pass_qps;
        self.block_qps += other.block_qps;
        self.success_qps += other.success_qps;
        self.exception_qps += other.exception_qps;
        self.occupied_pass_qps += other.occupied_pass_qps;
        self.rt = rt_sum / self.success_qps.max(1);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pass_qps == 0
            && self.block_qps == 0
            && self.success_qps == 0
            && self.exception_qps == 0
            && self.rt == 0
            && self.occupied_pass_qps == 0
    }
}

/// Thin line format: `timestamp|pass|block|success|exception|rt|occupied_pass`.
impl fmt::Display for MetricNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}|{}",
            self.timestamp,
            self.pass_qps,
            self.block_qps,
            self.success_qps,
            self.exception_qps,
            self.rt,
            self.occupied_pass_qps
        )
    }
}

impl FromStr for MetricNode {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts = line.trim().split('|').collect::<Vec<_>>();
        if parts.len() != 7 {
            return Err(Error::ParseNode(format!(
                "expected 7 fields, got {}: {:?}",
                parts.len(),
                line
            )));
        }
        Ok(Self {
            timestamp: parts[0].parse()?,
            pass_qps: parts[1].parse()?,
            block_qps: parts[2].parse()?,
            success_qps: parts[3].parse()?,
            exception_qps: parts[4].parse()?,
            rt: parts[5].parse()?,
            occupied_pass_qps: parts[6].parse()?,
        })
    }
}
