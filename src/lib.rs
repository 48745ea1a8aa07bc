use serde::{Deserialize, Serialize};

pub use crate::bucket::{MetricBucket, MetricEvent, DEFAULT_STATISTIC_MAX_RT};
pub use crate::clock::{system_clock, window_index_of, window_start_of, Clock, ManualClock, SystemClock};
pub use crate::error::{Error, Result};
pub use crate::leap_array::{LeapArray, Retention};
pub use crate::metric::ArrayMetric;
pub use crate::node::MetricNode;
pub use crate::window::{WindowSlot, WindowWrap};

mod bucket;
mod clock;
mod error;
mod leap_array;
mod metric;
mod node;
mod window;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    //Windows per interval
    pub sample_count: u32,
    //Rolling interval covered by all windows, in milliseconds
    pub interval_ms: u32,
    //Keep a borrow array so admissions can be granted against future windows
    pub occupiable: bool,
    //How far ahead of now an occupied pass may reserve, capped below interval_ms
    pub occupy_timeout_ms: u32,
    //Reported by min_rt when nothing was recorded
    pub statistic_max_rt: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_count: 2,
            interval_ms: 1000,
            occupiable: false,
            occupy_timeout_ms: 500,
            statistic_max_rt: DEFAULT_STATISTIC_MAX_RT,
        }
    }
}

impl Config {
    /// One second split into two windows, with occupy enabled.
    pub fn rolling_second() -> Self {
        Self {
            occupiable: true,
            ..Default::default()
        }
    }

    /// One minute split into sixty one-second windows.
    pub fn rolling_minute() -> Self {
        Self {
            sample_count: 60,
            interval_ms: 60_000,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        Self::check_geometry(self.sample_count, self.interval_ms)
    }

    pub(crate) fn check_geometry(sample_count: u32, interval_ms: u32) -> Result<()> {
        if sample_count == 0 {
            return Err(Error::InvalidSampleCount(sample_count));
        }
        if interval_ms == 0 {
            return Err(Error::InvalidInterval(interval_ms));
        }
        if interval_ms % sample_count != 0 {
            return Err(Error::IntervalNotDivisible {
                interval_ms,
                sample_count,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.sample_count, 2);
        assert_eq!(cfg.interval_ms, 1000);
        assert!(!cfg.occupiable);
    }

    #[test]
    fn test_presets() {
        assert!(Config::rolling_second().occupiable);
        let minute = Config::rolling_minute();
        assert_eq!(minute.validate(), Ok(()));
        assert!(!minute.occupiable);
    }

    #[test]
    fn test_validate() {
        let cfg = Config {
            sample_count: 3,
            interval_ms: 1000,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(Error::IntervalNotDivisible {
                interval_ms: 1000,
                sample_count: 3
            })
        );
        let cfg = Config {
            sample_count: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(Error::InvalidSampleCount(0)));
        assert!(ArrayMetric::new(cfg).is_err());
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"sample_count": 4, "occupiable": true}"#).unwrap();
        assert_eq!(cfg.sample_count, 4);
        assert_eq!(cfg.interval_ms, 1000);
        assert!(cfg.occupiable);
        assert_eq!(cfg.validate(), Ok(()));
    }
}
