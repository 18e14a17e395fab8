//! MemoryJobStore - 開発・テスト用のインメモリ store
//!
//! # 学習ポイント
//! - `SqliteJobStore` と同じ契約を HashMap + tokio の Mutex で実装
//! - プロセス終了で何も残らない

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{JobId, JobRecord, JobStatus, NewJob};
use crate::error::QueueError;
use crate::ports::JobStore;

struct MemoryState {
    rows: HashMap<JobId, JobRecord>,
    next_id: i64,
}

impl MemoryState {
    fn fifo(&self, status: JobStatus) -> Vec<JobRecord> {
        let mut rows: Vec<_> = self
            .rows
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.id));
        rows
    }
}

/// MemoryJobStore は HashMap による [`JobStore`] 実装
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                rows: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Insert a row as-is, for tests that need a specific starting state.
    #[cfg(test)]
    pub(crate) async fn insert_raw(&self, record: JobRecord) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(record.id.get() + 1);
        state.rows.insert(record.id, record);
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_pending(&self, job: &NewJob, created_at: i64) -> Result<JobId, QueueError> {
        let mut state = self.state.lock().await;
        let id = JobId::new(state.next_id);
        state.next_id += 1;
        state.rows.insert(id, JobRecord::pending(id, job, created_at));
        Ok(id)
    }

    async fn select_oldest_pending(&self) -> Result<Option<JobRecord>, QueueError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .values()
            .filter(|r| r.status == JobStatus::Pending)
            .min_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn claim(&self, id: JobId) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        match state.rows.get_mut(&id) {
            Some(row) if row.status == JobStatus::Pending => {
                row.status = JobStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        Ok(state
            .rows
            .get_mut(&id)
            .map(|row| row.status = status)
            .is_some())
    }

    async fn set_render_started(&self, id: JobId, at: i64) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        Ok(state
            .rows
            .get_mut(&id)
            .map(|row| row.render_started_at = at)
            .is_some())
    }

    async fn complete(&self, id: JobId, finished_at: i64) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        match state.rows.get_mut(&id) {
            Some(row) if row.status == JobStatus::Processing => {
                row.status = JobStatus::Completed;
                row.render_finished_at = finished_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue(&self, id: JobId, retry_count: u32) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        Ok(state
            .rows
            .get_mut(&id)
            .map(|row| {
                row.status = JobStatus::Pending;
                row.retry_count = retry_count;
            })
            .is_some())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        Ok(self.state.lock().await.rows.get(&id).cloned())
    }

    async fn delete(&self, id: JobId) -> Result<bool, QueueError> {
        Ok(self.state.lock().await.rows.remove(&id).is_some())
    }

    async fn select_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, QueueError> {
        Ok(self.state.lock().await.fifo(status))
    }

    async fn count_by_id_and_status(
        &self,
        id: JobId,
        status: JobStatus,
    ) -> Result<u64, QueueError> {
        let state = self.state.lock().await;
        Ok(u64::from(
            state.rows.get(&id).is_some_and(|r| r.status == status),
        ))
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, QueueError> {
        let state = self.state.lock().await;
        Ok(state.rows.values().filter(|r| r.status == status).count() as u64)
    }

    async fn history(&self, limit: usize) -> Result<Vec<JobRecord>, QueueError> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .rows
            .values()
            .filter(|r| r.status == JobStatus::Completed && r.render_seconds().is_some())
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.render_finished_at
                .cmp(&a.render_finished_at)
                .then(b.id.cmp(&a.id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn purge_completed_before(&self, cutoff: i64) -> Result<u64, QueueError> {
        let mut state = self.state.lock().await;
        let before = state.rows.len();
        state
            .rows
            .retain(|_, r| !(r.status == JobStatus::Completed && r.render_finished_at < cutoff));
        Ok((before - state.rows.len()) as u64)
    }

    async fn reset_orphaned(&self) -> Result<u64, QueueError> {
        let mut state = self.state.lock().await;
        let mut reset = 0;
        for row in state.rows.values_mut().filter(|r| r.is_orphaned()) {
            row.status = JobStatus::Pending;
            reset += 1;
        }
        Ok(reset)
    }
}
