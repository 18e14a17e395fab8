//! Read-only views over the queue, shaped for the control surface.

use serde::{Deserialize, Serialize};

use crate::domain::{JobId, JobRecord, JobStatus, UserId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
}

impl QueueCounts {
    pub fn record(&mut self, status: JobStatus, n: usize) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::Completed => self.completed += n,
        }
    }
}

/// One row of `list_queue`: everything not yet completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: JobId,
    pub display_name: String,
    pub requester: UserId,
    pub requester_name: String,
    pub is_processing: bool,
    /// Render start (unix seconds); 0 until the renderer picked the job up.
    pub started_at: i64,
    pub created_at: i64,
}

impl From<&JobRecord> for QueueEntry {
    fn from(r: &JobRecord) -> Self {
        Self {
            id: r.id,
            display_name: r.display_name.clone(),
            requester: r.requester,
            requester_name: r.requester_name.clone(),
            is_processing: r.status == JobStatus::Processing,
            started_at: r.render_started_at,
            created_at: r.created_at,
        }
    }
}

/// One row of `list_history`: a completed job with both render timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: JobId,
    pub display_name: String,
    pub requester: UserId,
    pub requester_name: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub created_at: i64,
}

impl HistoryEntry {
    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).max(0)
    }
}

impl From<&JobRecord> for HistoryEntry {
    fn from(r: &JobRecord) -> Self {
        Self {
            id: r.id,
            display_name: r.display_name.clone(),
            requester: r.requester,
            requester_name: r.requester_name.clone(),
            started_at: r.render_started_at,
            finished_at: r.render_finished_at,
            created_at: r.created_at,
        }
    }
}
