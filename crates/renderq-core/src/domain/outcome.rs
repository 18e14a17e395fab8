//! Outcome model: what the worker did with one job.
//!
//! These values are reported by the worker loop after every job so that
//! callers (tests, the CLI) can observe results without reading the store.

use serde::{Deserialize, Serialize};

use super::ids::UserId;

/// Final classification of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Artifact delivered, row marked completed.
    Completed,

    /// Attempt failed; the row went back to pending.
    Retrying { attempt: u32, max: u32 },

    /// Attempt failed and retries ran out; the row was deleted.
    Discarded { retries: u32 },

    /// Cancel observed at a checkpoint; the row was deleted.
    Cancelled,
}

impl JobOutcome {
    /// Whether the row is gone from the store after this outcome.
    pub fn removes_job(&self) -> bool {
        matches!(self, JobOutcome::Discarded { .. } | JobOutcome::Cancelled)
    }
}

/// The kind of artifact a pipeline run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Single rendered image.
    Still,

    /// Orbit frames stitched into one video.
    Animation { frames: u32 },
}

impl ArtifactKind {
    /// Message sent alongside the artifact.
    pub fn caption(&self, requester: UserId) -> String {
        match self {
            ArtifactKind::Still => {
                format!("Here's your rendered image! {}", requester.mention())
            }
            ArtifactKind::Animation { .. } => {
                format!("Here's your orbit animation! {}", requester.mention())
            }
        }
    }
}
