//! Queue module: the durable work queue façade, retry policy and cancellation.

mod cancel;
mod retry;

pub use cancel::{CancelState, CancellationController, Checkpoint};
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, info, warn};

use crate::domain::{JobId, JobRecord, JobStatus, NewJob, RetryDecision, UserId};
use crate::error::QueueError;
use crate::observability::{HistoryEntry, QueueCounts, QueueEntry};
use crate::ports::{Clock, JobStore};

/// What the startup pass repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub purged: u64,
    pub reset: u64,
}

/// In-process synchronization around the persistent store.
///
/// Design:
/// - Every store call happens under one lock, held only for that operation.
/// - `enqueue`/retry wake one blocked `dequeue`; shutdown wakes all of them.
/// - The cancellation controller is shared by `Arc` with the worker and the
///   control surface; it is never behind the lock.
pub struct WorkQueue {
    store: Mutex<Box<dyn JobStore>>,
    notify: Notify,
    shutdown_tx: watch::Sender<bool>,
    cancel: Arc<CancellationController>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl WorkQueue {
    pub fn new(store: Box<dyn JobStore>, clock: Arc<dyn Clock>, retention: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store: Mutex::new(store),
            notify: Notify::new(),
            shutdown_tx,
            cancel: Arc::new(CancellationController::new()),
            clock,
            retention,
        }
    }

    /// Startup self-healing: purge expired completed rows, then put orphaned
    /// `processing` rows back to `pending`.
    pub async fn initialize(&self) -> Result<RecoveryReport, QueueError> {
        let purged = self.purge_expired().await?;
        let reset = self.store.lock().await.reset_orphaned().await?;
        if reset > 0 {
            warn!(reset, "reset orphaned jobs to pending");
            self.notify.notify_one();
        }
        info!(purged, reset, "queue initialized");
        Ok(RecoveryReport { purged, reset })
    }

    pub async fn enqueue(&self, job: NewJob) -> Result<JobId, QueueError> {
        let id = {
            let store = self.store.lock().await;
            store.insert_pending(&job, self.clock.now()).await?
        };
        self.notify.notify_one();
        info!(job = %id, name = %job.display_name, requester = %job.requester, "job enqueued");
        Ok(id)
    }

    /// Wait for the oldest pending job and claim it.
    ///
    /// Returns `None` once shutdown is requested. Rows still pending stay in
    /// the store for the next run.
    pub async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError> {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            if *shutdown.borrow_and_update() {
                return Ok(None);
            }

            // Register interest before looking, so an enqueue between the
            // look and the wait is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let store = self.store.lock().await;
                if let Some(mut record) = store.select_oldest_pending().await? {
                    if store.claim(record.id).await? {
                        self.cancel.begin(record.id);
                        record.status = JobStatus::Processing;
                        info!(job = %record.id, name = %record.display_name, retry = record.retry_count, "job dequeued");
                        return Ok(Some(record));
                    }
                    debug!(job = %record.id, "claim lost, retrying");
                    continue;
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Stamp the render start time (distinct from claim time).
    pub async fn mark_render_started(&self, id: JobId) -> Result<bool, QueueError> {
        let store = self.store.lock().await;
        store.set_render_started(id, self.clock.now()).await
    }

    pub async fn mark_completed(&self, id: JobId) -> Result<bool, QueueError> {
        let done = {
            let store = self.store.lock().await;
            store.complete(id, self.clock.now()).await?
        };
        self.cancel.finish(id);
        if done {
            info!(job = %id, "job completed");
        } else {
            warn!(job = %id, "completion ignored, job is not processing");
        }
        Ok(done)
    }

    /// Apply the retry policy to a failed job.
    ///
    /// Returns `None` if the row no longer exists.
    pub async fn mark_failed(
        &self,
        id: JobId,
        policy: &RetryPolicy,
    ) -> Result<Option<RetryDecision>, QueueError> {
        let decision = {
            let store = self.store.lock().await;
            let Some(record) = store.get(id).await? else {
                warn!(job = %id, "job not found for retry update");
                self.cancel.finish(id);
                return Ok(None);
            };

            let decision = policy.decide(record.retry_count);
            match decision {
                RetryDecision::Discard { retries } => {
                    store.delete(id).await?;
                    warn!(job = %id, retries, "job failed permanently");
                }
                RetryDecision::Requeue { next_retry } => {
                    store.requeue(id, next_retry).await?;
                    warn!(job = %id, retry = next_retry, max = policy.max_retries, "job failed, will retry");
                }
            }
            decision
        };

        self.cancel.finish(id);
        if !decision.is_discard() {
            self.notify.notify_one();
        }
        Ok(Some(decision))
    }

    /// Flag the job the worker owns for cancellation and return its display
    /// name.
    ///
    /// The row is removed later, by `acknowledge_cancel`, once the pipeline
    /// reaches a checkpoint. A `processing` row the worker does not own is
    /// never targeted.
    pub async fn cancel_current(&self) -> Result<Option<String>, QueueError> {
        let Some(id) = self.cancel.current_job() else {
            return Ok(None);
        };
        let store = self.store.lock().await;
        let Some(record) = store.get(id).await? else {
            return Ok(None);
        };
        if record.status != JobStatus::Processing || !self.cancel.request(id) {
            debug!(job = %id, status = %record.status, "job is no longer running");
            return Ok(None);
        }
        info!(job = %id, name = %record.display_name, "cancellation requested");
        Ok(Some(record.display_name))
    }

    /// Delete the cancelled job's row and clear the controller. Safe to call
    /// more than once.
    ///
    /// The controller keeps the job until the delete succeeds, so a failed
    /// call can be repeated.
    pub async fn acknowledge_cancel(&self) -> Result<Option<JobId>, QueueError> {
        let store = self.store.lock().await;
        let Some(id) = self.cancel.current_job() else {
            return Ok(None);
        };
        store.delete(id).await?;
        self.cancel.acknowledge();
        info!(job = %id, "cancelled job removed");
        Ok(Some(id))
    }

    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.notify.notify_waiters();
        info!("queue shutdown requested");
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn cancellation(&self) -> &Arc<CancellationController> {
        &self.cancel
    }

    pub fn checkpoint(&self, id: JobId) -> Checkpoint {
        Checkpoint::new(id, Arc::clone(&self.cancel))
    }

    /// Processing row first, then pending in FIFO order.
    pub async fn list_queue(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let store = self.store.lock().await;
        let mut rows = store.select_by_status(JobStatus::Processing).await?;
        rows.extend(store.select_by_status(JobStatus::Pending).await?);
        Ok(rows.iter().map(QueueEntry::from).collect())
    }

    pub async fn list_history(&self, limit: usize) -> Result<Vec<HistoryEntry>, QueueError> {
        let store = self.store.lock().await;
        let rows = store.history(limit).await?;
        Ok(rows.iter().map(HistoryEntry::from).collect())
    }

    /// Owner of the running job; the oldest `processing` row when no worker
    /// owns one (read-only callers).
    pub async fn current_job_owner(&self) -> Result<Option<UserId>, QueueError> {
        let store = self.store.lock().await;
        if let Some(id) = self.cancel.current_job() {
            if let Some(record) = store.get(id).await? {
                if record.status == JobStatus::Processing {
                    return Ok(Some(record.requester));
                }
            }
        }
        let processing = store.select_by_status(JobStatus::Processing).await?;
        Ok(processing.first().map(|r| r.requester))
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let store = self.store.lock().await;
        let mut counts = QueueCounts::default();
        for status in [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed] {
            let n = store.count_by_status(status).await?;
            counts.record(status, n as usize);
        }
        Ok(counts)
    }

    pub async fn job(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        self.store.lock().await.get(id).await
    }

    pub async fn count_by_id_and_status(
        &self,
        id: JobId,
        status: JobStatus,
    ) -> Result<u64, QueueError> {
        self.store
            .lock()
            .await
            .count_by_id_and_status(id, status)
            .await
    }

    /// Delete completed rows older than the retention window.
    pub async fn purge_expired(&self) -> Result<u64, QueueError> {
        let retention = i64::try_from(self.retention.as_secs()).unwrap_or(i64::MAX);
        let cutoff = self.clock.now().saturating_sub(retention);
        let purged = self
            .store
            .lock()
            .await
            .purge_completed_before(cutoff)
            .await?;
        if purged > 0 {
            info!(purged, cutoff, "purged expired completed jobs");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::fixtures::new_job;
    use crate::impls::MemoryJobStore;
    use crate::ports::FixedClock;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn queue_at(now: i64) -> (Arc<WorkQueue>, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(now));
        let queue = WorkQueue::new(Box::new(MemoryJobStore::new()), clock.clone(), DAY);
        (Arc::new(queue), clock)
    }

    #[tokio::test]
    async fn enqueue_wakes_blocked_dequeue() {
        let (queue, _) = queue_at(1_000);
        let waiter = {
            let q = Arc::clone(&queue);
            tokio::spawn(async move { q.dequeue().await })
        };
        tokio::task::yield_now().await;

        let id = queue.enqueue(new_job("a.vmax.zip", "")).await.unwrap();
        let got = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(got.id, id);
        assert_eq!(got.status, JobStatus::Processing);
        assert_eq!(queue.cancellation().current_job(), Some(id));
    }

    #[tokio::test]
    async fn shutdown_releases_blocked_dequeue() {
        let (queue, _) = queue_at(1_000);
        let waiter = {
            let q = Arc::clone(&queue);
            tokio::spawn(async move { q.dequeue().await })
        };
        tokio::task::yield_now().await;

        queue.request_shutdown();
        assert!(waiter.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_leaves_pending_rows_in_place() {
        let (queue, _) = queue_at(1_000);
        let id = queue.enqueue(new_job("a", "")).await.unwrap();
        queue.request_shutdown();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(
            queue.count_by_id_and_status(id, JobStatus::Pending).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn retried_job_keeps_its_place() {
        let (queue, clock) = queue_at(1_000);
        let first = queue.enqueue(new_job("first", "")).await.unwrap();
        clock.advance(1);
        let second = queue.enqueue(new_job("second", "")).await.unwrap();

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.id, first);
        let decision = queue.mark_failed(first, &RetryPolicy::default()).await.unwrap();
        assert_eq!(decision, Some(RetryDecision::Requeue { next_retry: 1 }));

        let again = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(again.id, first);
        assert_eq!(again.retry_count, 1);
        queue.mark_completed(first).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn retry_bound_deletes_row() {
        let (queue, _) = queue_at(1_000);
        let policy = RetryPolicy::new(3);
        let id = queue.enqueue(new_job("w", "")).await.unwrap();

        for expected in 1..=2 {
            queue.dequeue().await.unwrap().unwrap();
            queue.mark_failed(id, &policy).await.unwrap();
            let row = queue.job(id).await.unwrap().unwrap();
            assert_eq!(row.status, JobStatus::Pending);
            assert_eq!(row.retry_count, expected);
        }

        queue.dequeue().await.unwrap().unwrap();
        let decision = queue.mark_failed(id, &policy).await.unwrap();
        assert_eq!(decision, Some(RetryDecision::Discard { retries: 3 }));
        assert!(queue.job(id).await.unwrap().is_none());
        assert_eq!(queue.mark_failed(id, &policy).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancel_then_acknowledge_removes_row() {
        let (queue, _) = queue_at(1_000);
        assert_eq!(queue.cancel_current().await.unwrap(), None);

        let id = queue.enqueue(new_job("castle.vmax.zip", "")).await.unwrap();
        queue.dequeue().await.unwrap().unwrap();

        let name = queue.cancel_current().await.unwrap();
        assert_eq!(name.as_deref(), Some("castle.vmax.zip"));
        // the row stays until the pipeline acknowledges
        assert!(queue.job(id).await.unwrap().is_some());
        assert!(queue.checkpoint(id).check("frame").is_err());

        assert_eq!(queue.acknowledge_cancel().await.unwrap(), Some(id));
        assert!(queue.job(id).await.unwrap().is_none());
        assert_eq!(queue.cancellation().current_job(), None);
        assert_eq!(queue.acknowledge_cancel().await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancel_targets_the_owned_job_not_a_stale_row() {
        let store = MemoryJobStore::new();
        let mut stale = JobRecord::pending(JobId::new(1), &new_job("stale.vmax.zip", ""), 10);
        stale.status = JobStatus::Processing;
        store.insert_raw(stale).await;
        let clock = Arc::new(FixedClock::new(1_000));
        let queue = WorkQueue::new(Box::new(store), clock, DAY);

        let mut running = new_job("running.vmax.zip", "");
        running.requester = UserId::from_u64(77);
        let id = queue.enqueue(running).await.unwrap();
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, id);

        assert_eq!(queue.current_job_owner().await.unwrap(), Some(UserId::from_u64(77)));
        assert_eq!(
            queue.cancel_current().await.unwrap().as_deref(),
            Some("running.vmax.zip")
        );
        assert_eq!(queue.acknowledge_cancel().await.unwrap(), Some(id));
        assert!(queue.job(JobId::new(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn initialize_recovers_and_purges() {
        let (queue, clock) = queue_at(1_000);
        let done = queue.enqueue(new_job("done", "")).await.unwrap();
        queue.dequeue().await.unwrap().unwrap();
        queue.mark_completed(done).await.unwrap();

        let orphan = queue.enqueue(new_job("orphan", "")).await.unwrap();
        queue.dequeue().await.unwrap().unwrap();

        clock.advance(DAY.as_secs() as i64 + 1);
        let report = queue.initialize().await.unwrap();
        assert_eq!(report, RecoveryReport { purged: 1, reset: 1 });
        assert!(queue.job(done).await.unwrap().is_none());
        assert_eq!(
            queue.count_by_id_and_status(orphan, JobStatus::Pending).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn queue_listing_and_owner() {
        let (queue, clock) = queue_at(1_000);
        assert_eq!(queue.current_job_owner().await.unwrap(), None);

        let mut a = new_job("a", "");
        a.requester = UserId::from_u64(11);
        queue.enqueue(a).await.unwrap();
        clock.advance(1);
        queue.enqueue(new_job("b", "")).await.unwrap();

        queue.dequeue().await.unwrap().unwrap();
        clock.advance(5);
        let list = queue.list_queue().await.unwrap();
        let view: Vec<_> = list
            .iter()
            .map(|e| (e.display_name.as_str(), e.is_processing))
            .collect();
        assert_eq!(view, vec![("a", true), ("b", false)]);
        assert_eq!(
            queue.current_job_owner().await.unwrap(),
            Some(UserId::from_u64(11))
        );

        let counts = queue.counts().await.unwrap();
        assert_eq!((counts.pending, counts.processing, counts.completed), (1, 1, 0));
    }

    #[tokio::test]
    async fn history_lists_rendered_jobs() {
        let (queue, clock) = queue_at(1_000);
        let id = queue.enqueue(new_job("a", "")).await.unwrap();
        queue.dequeue().await.unwrap().unwrap();
        clock.advance(2);
        queue.mark_render_started(id).await.unwrap();
        clock.advance(75);
        queue.mark_completed(id).await.unwrap();

        let history = queue.list_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].duration_secs(), 75);
    }
}
