//! Job record and status management.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ids::{ChannelId, JobId, UserId};
use super::options::RenderOptions;

/// Persisted job status.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Pending (failed, retries remain)
/// - Pending -> Processing -> (row deleted) on cancel or when retries run out
///
/// There is no terminal "failed" status: exhausted jobs are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
}

impl JobStatus {
    /// Text value stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A render request as submitted by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    /// URL or path of the payload to fetch.
    pub source: String,
    pub display_name: String,
    pub destination: ChannelId,
    pub requester: UserId,
    pub requester_name: String,
    /// Free text; carries pipeline directives such as `orbit=30`.
    #[serde(default)]
    pub metadata: String,
}

/// One persisted row of the work queue.
///
/// Timestamps are unix seconds; `render_started_at`/`render_finished_at` stay
/// at 0 until set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub source: String,
    pub display_name: String,
    pub destination: ChannelId,
    pub requester: UserId,
    pub requester_name: String,
    pub metadata: String,
    pub created_at: i64,
    pub retry_count: u32,
    pub status: JobStatus,
    pub render_started_at: i64,
    pub render_finished_at: i64,
}

impl JobRecord {
    /// Build the row a store creates for `job`.
    pub fn pending(id: JobId, job: &NewJob, created_at: i64) -> Self {
        Self {
            id,
            source: job.source.clone(),
            display_name: job.display_name.clone(),
            destination: job.destination,
            requester: job.requester,
            requester_name: job.requester_name.clone(),
            metadata: job.metadata.clone(),
            created_at,
            retry_count: 0,
            status: JobStatus::Pending,
            render_started_at: 0,
            render_finished_at: 0,
        }
    }

    pub fn options(&self) -> RenderOptions {
        RenderOptions::parse(&self.metadata)
    }

    /// A `processing` row that never finished. At startup nothing owns it.
    pub fn is_orphaned(&self) -> bool {
        self.status == JobStatus::Processing && self.render_finished_at == 0
    }

    /// Seconds spent rendering, when both timestamps are known.
    pub fn render_seconds(&self) -> Option<i64> {
        if self.render_started_at > 0 && self.render_finished_at > 0 {
            Some(self.render_finished_at - self.render_started_at)
        } else {
            None
        }
    }
}
