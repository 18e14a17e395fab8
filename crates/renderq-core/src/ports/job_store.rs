//! JobStore port - キューの正となる永続テーブル
//!
//! JobStore が管理するもの:
//! - ジョブごとに1行（status, タイムスタンプ, retry 回数）
//! - pending の FIFO 選択
//! - 起動時の自己修復（保持期間の purge, 孤児行の reset）
//!
//! 実装側は自前の接続管理以上の排他はしない。
//! 呼び出しはキューのファサードが1つのロックで直列化する。

use async_trait::async_trait;

use crate::domain::{JobId, JobRecord, JobStatus, NewJob};
use crate::error::QueueError;

/// JobStore は永続 store の契約
///
/// `bool` を返すメソッドは行が更新されたかどうかを返す。
/// 競合負けや行の欠落を成功と区別できる。
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a `pending` row with `retry_count = 0`; the store assigns the id.
    async fn insert_pending(&self, job: &NewJob, created_at: i64) -> Result<JobId, QueueError>;

    /// Oldest pending row by `created_at`, ties broken by id.
    async fn select_oldest_pending(&self) -> Result<Option<JobRecord>, QueueError>;

    /// Flip `pending -> processing`. Returns false if the row was not pending.
    async fn claim(&self, id: JobId) -> Result<bool, QueueError>;

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<bool, QueueError>;

    /// Record when the renderer picked the job up.
    async fn set_render_started(&self, id: JobId, at: i64) -> Result<bool, QueueError>;

    /// `processing -> completed` and stamp the end time in one statement.
    async fn complete(&self, id: JobId, finished_at: i64) -> Result<bool, QueueError>;

    /// Back to `pending` with the given retry count. `created_at` is untouched.
    async fn requeue(&self, id: JobId, retry_count: u32) -> Result<bool, QueueError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, QueueError>;

    async fn delete(&self, id: JobId) -> Result<bool, QueueError>;

    /// Rows with `status`, in FIFO order.
    async fn select_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, QueueError>;

    async fn count_by_id_and_status(
        &self,
        id: JobId,
        status: JobStatus,
    ) -> Result<u64, QueueError>;

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, QueueError>;

    /// Completed rows with both render timestamps set, newest end first.
    async fn history(&self, limit: usize) -> Result<Vec<JobRecord>, QueueError>;

    /// Delete completed rows that finished before `cutoff`. Returns rows removed.
    async fn purge_completed_before(&self, cutoff: i64) -> Result<u64, QueueError>;

    /// Reset `processing` rows with no end time back to `pending`.
    async fn reset_orphaned(&self) -> Result<u64, QueueError>;
}
