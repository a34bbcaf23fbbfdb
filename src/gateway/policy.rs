use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error_code::ErrorKind;
use crate::Error;

/// Decision for how to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Upstream retry policy.
///
/// - Transport errors (unavailable, timeout) and upstream throttling are retried
///   up to `max_retries` times.
/// - Backoff is `min_delay * 2^attempt`, capped at `max_delay`; a server
///   `Retry-After` hint replaces the computed delay (still capped).
/// - Everything else fails immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "millis")]
    pub min_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = if self.min_delay.is_zero() {
            Duration::ZERO
        } else {
            // exponential backoff: min_delay * 2^attempt
            let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
            self.min_delay.saturating_mul(factor)
        };
        retry_after.unwrap_or(base).min(self.max_delay)
    }

    /// Decide what to do after `err`.
    ///
    /// `attempt` is 0-based (first failure => attempt=0).
    pub fn decide(&self, err: &Error, attempt: u32) -> Decision {
        if err.kind().retryable() && attempt < self.max_retries {
            return Decision::Retry {
                delay: self.backoff_delay(attempt, err.retry_after()),
            };
        }
        Decision::Fail
    }

    /// Error to surface once the policy gives up after `attempts` tries.
    ///
    /// Transport failures that were retried at least once collapse into
    /// `UpstreamUnavailable` carrying the last cause; upstream throttling and
    /// non-retryable errors pass through unchanged.
    pub fn exhausted(&self, err: Error, attempts: u32) -> Error {
        match err.kind() {
            ErrorKind::UpstreamUnavailable | ErrorKind::UpstreamTimeout if attempts > 1 => {
                Error::unavailable(format!("giving up after {} attempts: {}", attempts, err))
            }
            _ => err,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
