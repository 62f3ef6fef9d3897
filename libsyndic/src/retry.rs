//! Retry decisions for failed publish attempts
//!
//! Given a failed attempt, the policy either schedules another attempt or
//! declares the distribution failed. Windows with a fixed retry interval use
//! it verbatim; otherwise delays grow exponentially from a seed, capped, with
//! a little jitter so simultaneous failures do not refire in lockstep.

use rand::Rng;

use crate::types::{PublishReport, PublishingWindow};

pub const DEFAULT_MIN_BACKOFF_SECS: i64 = 30;
pub const DEFAULT_MAX_BACKOFF_SECS: i64 = 3600;

/// What to do with a distribution after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue for another attempt at the given instant
    Retry { next_attempt_at: i64 },
    /// Give up; the reason is recorded on the distribution
    Fail { reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub min_backoff_secs: i64,
    pub max_backoff_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_backoff_secs: DEFAULT_MIN_BACKOFF_SECS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
        }
    }
}

impl RetryPolicy {
    pub fn new(min_backoff_secs: i64, max_backoff_secs: i64) -> Self {
        Self {
            min_backoff_secs: min_backoff_secs.max(1),
            max_backoff_secs: max_backoff_secs.max(min_backoff_secs.max(1)),
        }
    }

    /// Decide the fate of a distribution whose latest attempt failed.
    ///
    /// `attempts_made` counts every attempt so far, including the failed one,
    /// so a window with `max_retry_count = n` allows `n + 1` attempts total.
    pub fn decide(
        &self,
        report: &PublishReport,
        attempts_made: u32,
        window: &PublishingWindow,
        now: i64,
    ) -> RetryDecision {
        debug_assert!(!report.success, "decide() is only called on failures");

        if !report.retryable {
            return RetryDecision::Fail {
                reason: report
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "publish failed".to_string()),
            };
        }

        if attempts_made > window.max_retry_count {
            return RetryDecision::Fail {
                reason: "retries exhausted".to_string(),
            };
        }

        let delay = match window.retry_interval_secs {
            Some(interval) => interval,
            None => self.backoff_delay(attempts_made),
        };
        RetryDecision::Retry {
            next_attempt_at: now + delay,
        }
    }

    /// Exponential delay for the given number of attempts already made,
    /// capped and jittered by up to a quarter of the base delay.
    fn backoff_delay(&self, attempts_made: u32) -> i64 {
        let exponent = attempts_made.saturating_sub(1).min(20);
        let base = self
            .min_backoff_secs
            .saturating_mul(1i64 << exponent)
            .min(self.max_backoff_secs);
        let jitter_cap = (base / 4).max(1);
        base + rand::thread_rng().gen_range(0..jitter_cap)
    }
}
