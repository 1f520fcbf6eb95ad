//! Retry eligibility and backoff policy
//!
//! A [`RetryPolicy`] is a pure decision value: given a status code and an
//! attempt index it answers whether another attempt may be issued, and how
//! long to wait before it. It never sleeps or performs I/O itself; the
//! client owns the loop.

use std::collections::HashSet;
use std::time::Duration;

/// Upper bound on the exponent so schedules stay finite for absurd
/// attempt counts.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Backoff schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^attempt`
    Exponential { base: Duration },
    /// `interval * (attempt + 1)`
    Linear { interval: Duration },
    /// `interval`, regardless of attempt
    Fixed { interval: Duration },
}

impl Backoff {
    /// Delay before the retry that follows a failed attempt `attempt`
    /// (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential { base } => {
                let factor = 1u32 << attempt.min(MAX_BACKOFF_SHIFT);
                base.saturating_mul(factor)
            }
            Self::Linear { interval } => interval.saturating_mul(attempt.saturating_add(1)),
            Self::Fixed { interval } => *interval,
        }
    }
}

/// Immutable retry policy shared across calls.
///
/// `max_attempts` counts total executions, not just retries; it is clamped
/// to at least 1 so a policy can never forbid the initial attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    retryable_statuses: HashSet<u16>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        backoff: Backoff,
        retryable_statuses: impl IntoIterator<Item = u16>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retryable_statuses: retryable_statuses.into_iter().collect(),
        }
    }

    /// Policy that performs the initial attempt only and retries nothing.
    pub fn none() -> Self {
        Self::new(1, Backoff::Fixed { interval: Duration::ZERO }, [])
    }

    /// Whether attempt number `attempt` (0-based; the initial attempt is 0)
    /// may be issued after a failure with `status`.
    pub fn should_retry(&self, status: u16, attempt: u32) -> bool {
        attempt < self.max_attempts && self.retryable_statuses.contains(&status)
    }

    /// Delay before the retry that follows a failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, exponential backoff from 1s, retrying request timeout,
    /// rate limiting, and transient server failures.
    fn default() -> Self {
        Self::new(
            3,
            Backoff::Exponential { base: Duration::from_secs(1) },
            [408, 429, 500, 502, 503, 504],
        )
    }
}
