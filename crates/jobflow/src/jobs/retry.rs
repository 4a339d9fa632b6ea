use chrono::{DateTime, Duration, Utc};

use crate::jobs::settings::Settings;

/// Ceiling for computed delays. Large exponents saturate here instead of
/// overflowing the timestamp arithmetic (about a century).
pub const SATURATED_DELAY_SECONDS: i64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: i64,
    /// Optional upper bound on a single delay. Delays under the bound are
    /// exactly `backoff_base ^ attempts`.
    pub max_delay_seconds: Option<i64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Settings::DEFAULT_BACKOFF_BASE,
            max_delay_seconds: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff_base: i64) -> Self {
        Self {
            backoff_base,
            max_delay_seconds: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay_seconds: Option<i64>) -> Self {
        self.max_delay_seconds = max_delay_seconds;
        self
    }

    pub fn next_delay(&self, attempts: i32) -> Duration {
        let mut secs = next_delay_seconds(attempts, self.backoff_base);
        if let Some(max) = self.max_delay_seconds {
            secs = secs.min(max.max(0));
        }
        Duration::seconds(secs)
    }

    pub fn next_retry_at(&self, attempts: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.next_delay(attempts)
    }

    pub fn should_dead_letter(&self, attempts: i32, max_retries: i32) -> bool {
        should_dead_letter(attempts, max_retries)
    }
}

/// `base ^ attempts` seconds, where `attempts` already includes the failure
/// being recorded.
pub fn next_delay_seconds(attempts: i32, base: i64) -> i64 {
    let exp = attempts.max(0) as u32;
    let base = base.max(1);

    base.checked_pow(exp)
        .unwrap_or(i64::MAX)
        .min(SATURATED_DELAY_SECONDS)
}

pub fn should_dead_letter(attempts: i32, max_retries: i32) -> bool {
    attempts >= max_retries
}
