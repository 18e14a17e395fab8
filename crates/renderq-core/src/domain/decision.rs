//! Decision model: what happens to a job after a failed attempt.

use serde::{Deserialize, Serialize};

/// The next action for a failed job.
///
/// Produced by [`crate::queue::RetryPolicy::decide`], which is a pure function
/// of the stored retry count and the configured bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RetryDecision {
    /// Put the row back to pending with `retry_count = next_retry`.
    ///
    /// `created_at` is left untouched, so the job keeps its original place
    /// in FIFO order.
    Requeue { next_retry: u32 },

    /// Delete the row. `retries` is the number of failed attempts seen.
    Discard { retries: u32 },
}

impl RetryDecision {
    pub fn is_discard(&self) -> bool {
        matches!(self, RetryDecision::Discard { .. })
    }
}
