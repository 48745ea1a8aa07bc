use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    #[error("sample count must be positive, got {0}")]
    InvalidSampleCount(u32),
    #[error("interval must be positive, got {0}ms")]
    InvalidInterval(u32),
    #[error("interval {interval_ms}ms is not a multiple of sample count {sample_count}")]
    IntervalNotDivisible { interval_ms: u32, sample_count: u32 },
    #[error("negative count: {0}")]
    NegativeCount(i64),
    #[error("occupy is not enabled for this metric")]
    OccupyDisabled,
    #[error("future window out of range, now: {now}, target: {target}, horizon: {horizon}ms")]
    FutureWindowOutOfRange { now: i64, target: i64, horizon: i64 },
    #[error("malformed metric node, {0}")]
    ParseNode(String),
    #[error("{0}")]
    Msg(String),
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Self::Msg(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Self::Msg(e.to_owned())
    }
}

impl From<std::num::ParseIntError> for Error {
    #[inline]
    fn from(e: std::num::ParseIntError) -> Self {
        Self::ParseNode(e.to_string())
    }
}
