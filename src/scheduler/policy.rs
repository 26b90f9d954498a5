use crate::utils::error::{Result, YtdlError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Number of jobs allowed to run at once, always within [1, 5]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct ConcurrencyLimit(usize);

impl ConcurrencyLimit {
    pub const MIN: usize = 1;
    pub const MAX: usize = 5;

    pub fn new(value: usize) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(YtdlError::InvalidConcurrencyLimit(value))
        }
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for ConcurrencyLimit {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<usize> for ConcurrencyLimit {
    type Error = YtdlError;

    fn try_from(value: usize) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ConcurrencyLimit> for usize {
    fn from(limit: ConcurrencyLimit) -> usize {
        limit.0
    }
}

impl fmt::Display for ConcurrencyLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How transient extraction failures are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Pause before each retry; the job keeps its slot meanwhile
    pub backoff: Duration,
    /// Silence from the extractor longer than this counts as a stall
    pub stall_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_secs(2),
            stall_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Total attempts a job may make
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_limit_bounds() {
        assert_err!(ConcurrencyLimit::new(0));
        assert_err!(ConcurrencyLimit::new(6));
        for n in 1..=5 {
            assert_eq!(assert_ok!(ConcurrencyLimit::new(n)).get(), n);
        }
        assert_eq!(ConcurrencyLimit::default().get(), 3);
    }

    #[test]
    fn test_limit_deserialization_is_checked() {
        let ok: ConcurrencyLimit = serde_json::from_str("4").unwrap();
        assert_eq!(ok.get(), 4);
        assert!(serde_json::from_str::<ConcurrencyLimit>("9").is_err());
    }

    #[test]
    fn test_retry_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.stall_timeout, Duration::from_secs(60));
    }
}
