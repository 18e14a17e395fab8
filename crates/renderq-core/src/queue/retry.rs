//! Retry policy: decides whether a failed job runs again.

use crate::domain::RetryDecision;

/// Retry policy for failed jobs.
///
/// Attempts are counted by the stored `retry_count`: the failure being
/// reported is attempt `retry_count + 1`. Once that reaches `max_retries`
/// the job is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Decide what happens to a job whose stored retry count is `retry_count`.
    ///
    /// Example with max_retries=3:
    /// - retry_count 0 (first failure): requeue with 1
    /// - retry_count 1: requeue with 2
    /// - retry_count 2: discard after 3 failures
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        let failures = retry_count.saturating_add(1);
        if failures >= self.max_retries {
            RetryDecision::Discard { retries: failures }
        } else {
            RetryDecision::Requeue {
                next_retry: failures,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}
