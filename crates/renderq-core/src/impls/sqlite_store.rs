//! SqliteJobStore - the production persistent store
//!
//! # Implementation
//! - one `render_jobs` table plus an index on `(status, created_at)`
//! - a single-connection pool, so every statement is serialized
//! - ids come from SQLite's rowid (`last_insert_rowid`)

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, Pool, Sqlite};
use tracing::debug;

use crate::domain::{ChannelId, JobId, JobRecord, JobStatus, NewJob, UserId};
use crate::error::QueueError;
use crate::ports::JobStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS render_jobs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url       TEXT    NOT NULL,
    display_name     TEXT    NOT NULL,
    destination_id   INTEGER NOT NULL,
    requester_id     INTEGER NOT NULL,
    requester_name   TEXT    NOT NULL,
    metadata         TEXT    NOT NULL DEFAULT '',
    created_at       INTEGER NOT NULL,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    status           TEXT    NOT NULL DEFAULT 'pending',
    processing_start INTEGER NOT NULL DEFAULT 0,
    processing_end   INTEGER NOT NULL DEFAULT 0
)
"#;

const INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_render_jobs_status_created ON render_jobs(status, created_at)";

const COLUMNS: &str = "id, source_url, display_name, destination_id, requester_id, \
     requester_name, metadata, created_at, retry_count, status, processing_start, processing_end";

/// Raw row as stored; converted into [`JobRecord`] with validation.
#[derive(Debug, Clone, FromRow)]
struct JobRow {
    id: i64,
    source_url: String,
    display_name: String,
    destination_id: i64,
    requester_id: i64,
    requester_name: String,
    metadata: String,
    created_at: i64,
    retry_count: i64,
    status: String,
    processing_start: i64,
    processing_end: i64,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = JobId::new(row.id);
        let status = JobStatus::from_str(&row.status).map_err(|e| QueueError::CorruptRow {
            id,
            reason: e.to_string(),
        })?;
        let retry_count = u32::try_from(row.retry_count).map_err(|_| QueueError::CorruptRow {
            id,
            reason: format!("retry_count out of range: {}", row.retry_count),
        })?;

        Ok(JobRecord {
            id,
            source: row.source_url,
            display_name: row.display_name,
            destination: ChannelId::new(row.destination_id),
            requester: UserId::new(row.requester_id),
            requester_name: row.requester_name,
            metadata: row.metadata,
            created_at: row.created_at,
            retry_count,
            status,
            render_started_at: row.processing_start,
            render_finished_at: row.processing_end,
        })
    }
}

/// SQLite-backed [`JobStore`].
///
/// # Example
/// ```ignore
/// let store = SqliteJobStore::open("data/renderq.db").await?;
/// let queue = WorkQueue::new(Box::new(store), clock, retention);
/// ```
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: Pool<Sqlite>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        Self::connect(options).await
    }

    /// Private in-memory database, for tests.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, QueueError> {
        // One connection: writes are serialized and an in-memory database
        // lives exactly as long as the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(BUSY_TIMEOUT)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), QueueError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        sqlx::query(INDEX).execute(&self.pool).await?;
        debug!("render_jobs schema ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert_pending(&self, job: &NewJob, created_at: i64) -> Result<JobId, QueueError> {
        let result = sqlx::query(
            "INSERT INTO render_jobs \
             (source_url, display_name, destination_id, requester_id, requester_name, metadata, created_at, retry_count, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 'pending')",
        )
        .bind(&job.source)
        .bind(&job.display_name)
        .bind(job.destination.get())
        .bind(job.requester.get())
        .bind(&job.requester_name)
        .bind(&job.metadata)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(JobId::new(result.last_insert_rowid()))
    }

    async fn select_oldest_pending(&self) -> Result<Option<JobRecord>, QueueError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM render_jobs WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC LIMIT 1"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRecord::try_from).transpose()
    }

    async fn claim(&self, id: JobId) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE render_jobs SET status = 'processing' WHERE id = ? AND status = 'pending'",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<bool, QueueError> {
        let result = sqlx::query("UPDATE render_jobs SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_render_started(&self, id: JobId, at: i64) -> Result<bool, QueueError> {
        let result = sqlx::query("UPDATE render_jobs SET processing_start = ? WHERE id = ?")
            .bind(at)
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, id: JobId, finished_at: i64) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE render_jobs SET status = 'completed', processing_end = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(finished_at)
        .bind(id.get())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn requeue(&self, id: JobId, retry_count: u32) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE render_jobs SET status = 'pending', retry_count = ? WHERE id = ?",
        )
        .bind(i64::from(retry_count))
        .bind(id.get())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        let sql = format!("SELECT {COLUMNS} FROM render_jobs WHERE id = ?");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRecord::try_from).transpose()
    }

    async fn delete(&self, id: JobId) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM render_jobs WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn select_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, QueueError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM render_jobs WHERE status = ? ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn count_by_id_and_status(
        &self,
        id: JobId,
        status: JobStatus,
    ) -> Result<u64, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM render_jobs WHERE id = ? AND status = ?")
                .bind(id.get())
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, QueueError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM render_jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn history(&self, limit: usize) -> Result<Vec<JobRecord>, QueueError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM render_jobs \
             WHERE status = 'completed' AND processing_start > 0 AND processing_end > 0 \
             ORDER BY processing_end DESC, id DESC LIMIT ?"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn purge_completed_before(&self, cutoff: i64) -> Result<u64, QueueError> {
        let result =
            sqlx::query("DELETE FROM render_jobs WHERE status = 'completed' AND processing_end < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn reset_orphaned(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE render_jobs SET status = 'pending' \
             WHERE status = 'processing' AND processing_end = 0",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
