//! WorkerLoop - キューの唯一のコンシューマ
//!
//! # フロー
//! 1. `WorkQueue::dequeue()` で最も古い pending ジョブを claim
//! 2. `JobPipeline` で fetch・staging・render
//! 3. `Notifier` で成果物を配送
//! 4. store を更新（completed / retry or discard / キャンセル時は削除）
//!
//! ジョブは常に1件ずつ処理する。レンダラーは再入不可。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{error, info, instrument, warn};

use crate::app::pipeline::JobPipeline;
use crate::domain::{
    ErrorKind, JobId, JobOutcome, JobRecord, PipelineError, RetryDecision, WorkerState,
};
use crate::error::QueueError;
use crate::ports::{Delivery, Notifier};
use crate::queue::{Checkpoint, RetryPolicy, WorkQueue};

/// Capacity of the outcome broadcast; slow subscribers miss old reports.
const REPORT_CAPACITY: usize = 64;

/// First delay before repeating a failed store transition; doubles up to
/// `STORE_RETRY_MAX`.
const STORE_RETRY_BASE: Duration = Duration::from_millis(250);
const STORE_RETRY_MAX: Duration = Duration::from_secs(10);

/// What happened to one job, published after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub job: JobId,
    pub outcome: JobOutcome,
}

/// WorkerLoop はジョブを1件ずつ実行
pub struct WorkerLoop {
    queue: Arc<WorkQueue>,
    pipeline: Arc<JobPipeline>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    idle_pause: Duration,
    store_retry: Duration,
    state_tx: watch::Sender<WorkerState>,
    report_tx: broadcast::Sender<JobReport>,
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<WorkQueue>,
        pipeline: Arc<JobPipeline>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
        idle_pause: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        let (report_tx, _) = broadcast::channel(REPORT_CAPACITY);
        Self {
            queue,
            pipeline,
            notifier,
            policy,
            idle_pause,
            store_retry: STORE_RETRY_BASE,
            state_tx,
            report_tx,
        }
    }

    /// Override the first backoff step used when the store rejects a
    /// transition or a dequeue.
    pub fn with_store_retry(mut self, base: Duration) -> Self {
        self.store_retry = base;
        self
    }

    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    pub fn reports(&self) -> broadcast::Sender<JobReport> {
        self.report_tx.clone()
    }

    /// Run until shutdown is requested and the in-flight job has drained.
    pub async fn run(self) {
        info!(max_retries = self.policy.max_retries, "worker started");
        loop {
            let job = match self.queue.dequeue().await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "dequeue failed");
                    self.pause(self.idle_pause.max(self.store_retry)).await;
                    continue;
                }
            };

            let id = job.id;
            match self.process(job).await {
                Ok(outcome) => {
                    let _ = self.report_tx.send(JobReport { job: id, outcome });
                }
                Err(e) => error!(job = %id, error = %e, "store update abandoned at shutdown"),
            }
            self.set_state(WorkerState::Idle);
            self.pause(self.idle_pause).await;
        }
        self.set_state(WorkerState::Idle);
        info!("worker stopped");
    }

    /// Drive one claimed job to its outcome and record it in the store.
    ///
    /// Only store failures are returned; every pipeline failure is turned
    /// into an outcome here. The closing store transition is repeated with
    /// backoff until it lands, so the row never stays `processing` while
    /// the worker moves on. Only a shutdown stops the repeats; startup
    /// recovery then resets the row.
    #[instrument(skip_all, fields(job = %job.id, name = %job.display_name, retry = job.retry_count))]
    pub async fn process(&self, job: JobRecord) -> Result<JobOutcome, QueueError> {
        let checkpoint = self.queue.checkpoint(job.id);
        self.set_state(WorkerState::Fetching);

        match self.attempt(&job, &checkpoint).await {
            Ok(()) => {
                let queue = &self.queue;
                self.settle("complete", job.id, move || queue.mark_completed(job.id))
                    .await?;
                Ok(JobOutcome::Completed)
            }
            // A pending cancel wins over whatever error the unwind produced.
            Err(e) if e.is_cancelled() || checkpoint.is_cancelled() => {
                self.set_state(WorkerState::Cancelling);
                let queue = &self.queue;
                self.settle("acknowledge_cancel", job.id, move || queue.acknowledge_cancel())
                    .await?;
                info!(error = %e, "job cancelled");
                self.notify(Delivery::text(
                    job.destination,
                    format!("Cancelled render: `{}`", job.display_name),
                ))
                .await;
                Ok(JobOutcome::Cancelled)
            }
            Err(e) => {
                self.set_state(WorkerState::Failed);
                if e.kind() == ErrorKind::Infrastructure {
                    error!(error = %e, "store failed mid-job");
                } else {
                    warn!(error = %e, "job attempt failed");
                }
                self.fail(&job, &e).await
            }
        }
    }

    async fn attempt(&self, job: &JobRecord, checkpoint: &Checkpoint) -> Result<(), PipelineError> {
        let payload = self.pipeline.fetch(job, checkpoint).await?;

        self.set_state(WorkerState::Pipelining);
        let artifact = self
            .pipeline
            .render(&self.queue, job, payload, checkpoint)
            .await?;
        checkpoint.check("deliver")?;

        self.set_state(WorkerState::Delivering);
        let bytes = artifact.read().await?;
        self.notifier
            .deliver(
                Delivery::text(job.destination, artifact.kind.caption(job.requester))
                    .with_attachment(artifact.file_name.clone(), bytes),
            )
            .await?;
        info!(artifact = %artifact.file_name, "artifact delivered");
        Ok(())
    }

    async fn fail(&self, job: &JobRecord, err: &PipelineError) -> Result<JobOutcome, QueueError> {
        let queue = &self.queue;
        let policy = self.policy;
        let decision = self
            .settle("mark_failed", job.id, move || async move {
                queue.mark_failed(job.id, &policy).await
            })
            .await?;
        let outcome = match decision {
            Some(RetryDecision::Requeue { next_retry }) => JobOutcome::Retrying {
                attempt: next_retry,
                max: self.policy.max_retries,
            },
            Some(RetryDecision::Discard { retries }) => {
                error!(retries, error = %err, "job discarded");
                self.notify(Delivery::text(
                    job.destination,
                    err.failure_notice(&job.display_name),
                ))
                .await;
                JobOutcome::Discarded { retries }
            }
            None => JobOutcome::Discarded {
                retries: job.retry_count.saturating_add(1),
            },
        };
        Ok(outcome)
    }

    /// Notices are best effort; a failed notice does not change the outcome.
    async fn notify(&self, delivery: Delivery) {
        let destination = delivery.destination;
        if let Err(e) = self.notifier.deliver(delivery).await {
            warn!(destination = %destination, error = %e, "failed to send notice");
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state_tx.send_replace(state);
    }

    /// Run a store transition until it succeeds or shutdown is requested.
    async fn settle<T, F, Fut>(&self, action: &'static str, job: JobId, mut op: F) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let mut delay = self.store_retry;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.queue.is_shutdown() => return Err(e),
                Err(e) => {
                    error!(
                        job = %job,
                        action,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "store update failed, retrying"
                    );
                    self.pause(delay).await;
                    delay = (delay * 2).min(STORE_RETRY_MAX);
                }
            }
        }
    }

    /// Sleep for `duration`; cut short by shutdown.
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let mut shutdown = self.queue.shutdown_signal();
        if *shutdown.borrow_and_update() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::PipelineSettings;
    use crate::app::staging::test_archive;
    use crate::config::RenderqConfig;
    use crate::domain::job::fixtures::new_job;
    use crate::domain::{FetchError, JobStatus, NewJob, NotifyError, RenderError, StitchError};
    use crate::impls::MemoryJobStore;
    use crate::ports::{
        FixedClock, FrameRequest, FrameSequence, FrameStitcher, JobStore, PayloadFetcher,
        PreparedScene, RenderSession, SceneRenderer, SceneRequest,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` fetches.
    struct FlakyFetcher {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PayloadFetcher for FlakyFetcher {
        async fn fetch(&self, source: &str) -> Result<Bytes, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(FetchError::Status {
                    url: source.to_string(),
                    status: 503,
                });
            }
            Ok(test_archive::scene_zip())
        }
    }

    struct Done;

    #[async_trait]
    impl RenderSession for Done {
        async fn is_rendering(&mut self) -> Result<bool, RenderError> {
            Ok(false)
        }

        async fn stop(&mut self) -> Result<(), RenderError> {
            Ok(())
        }
    }

    struct InstantRenderer;

    #[async_trait]
    impl SceneRenderer for InstantRenderer {
        async fn prepare_scene(&self, request: SceneRequest<'_>) -> Result<PreparedScene, RenderError> {
            Ok(PreparedScene {
                job: request.job,
                scene_dir: request.scene_dir.to_path_buf(),
                metadata: request.metadata.to_string(),
            })
        }

        async fn start_frame(
            &self,
            _scene: &PreparedScene,
            frame: &FrameRequest,
        ) -> Result<Box<dyn RenderSession>, RenderError> {
            std::fs::write(&frame.output, b"img").unwrap();
            Ok(Box::new(Done))
        }
    }

    struct NoStitch;

    #[async_trait]
    impl FrameStitcher for NoStitch {
        async fn stitch(&self, _frames: &FrameSequence, _output: &Path) -> Result<(), StitchError> {
            Err(StitchError::NoFrames)
        }
    }

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<Delivery>>,
    }

    #[async_trait]
    impl Notifier for Outbox {
        async fn deliver(&self, delivery: Delivery) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(delivery);
            Ok(())
        }
    }

    /// In-memory store that rejects the first `complete_failures`
    /// completions and the first `select_failures` pending lookups.
    struct FaultyStore {
        inner: MemoryJobStore,
        complete_failures: AtomicU32,
        select_failures: AtomicU32,
        selects: Arc<AtomicU32>,
    }

    impl FaultyStore {
        fn new(complete_failures: u32, select_failures: u32) -> Self {
            Self {
                inner: MemoryJobStore::new(),
                complete_failures: AtomicU32::new(complete_failures),
                select_failures: AtomicU32::new(select_failures),
                selects: Arc::new(AtomicU32::new(0)),
            }
        }

        fn disk_full(budget: &AtomicU32) -> Result<(), QueueError> {
            let left = budget.load(Ordering::SeqCst);
            if left > 0 {
                budget.store(left - 1, Ordering::SeqCst);
                return Err(QueueError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl JobStore for FaultyStore {
        async fn insert_pending(&self, job: &NewJob, created_at: i64) -> Result<JobId, QueueError> {
            self.inner.insert_pending(job, created_at).await
        }

        async fn select_oldest_pending(&self) -> Result<Option<JobRecord>, QueueError> {
            self.selects.fetch_add(1, Ordering::SeqCst);
            Self::disk_full(&self.select_failures)?;
            self.inner.select_oldest_pending().await
        }

        async fn claim(&self, id: JobId) -> Result<bool, QueueError> {
            self.inner.claim(id).await
        }

        async fn update_status(&self, id: JobId, status: JobStatus) -> Result<bool, QueueError> {
            self.inner.update_status(id, status).await
        }

        async fn set_render_started(&self, id: JobId, at: i64) -> Result<bool, QueueError> {
            self.inner.set_render_started(id, at).await
        }

        async fn complete(&self, id: JobId, finished_at: i64) -> Result<bool, QueueError> {
            Self::disk_full(&self.complete_failures)?;
            self.inner.complete(id, finished_at).await
        }

        async fn requeue(&self, id: JobId, retry_count: u32) -> Result<bool, QueueError> {
            self.inner.requeue(id, retry_count).await
        }

        async fn get(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
            self.inner.get(id).await
        }

        async fn delete(&self, id: JobId) -> Result<bool, QueueError> {
            self.inner.delete(id).await
        }

        async fn select_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, QueueError> {
            self.inner.select_by_status(status).await
        }

        async fn count_by_id_and_status(
            &self,
            id: JobId,
            status: JobStatus,
        ) -> Result<u64, QueueError> {
            self.inner.count_by_id_and_status(id, status).await
        }

        async fn count_by_status(&self, status: JobStatus) -> Result<u64, QueueError> {
            self.inner.count_by_status(status).await
        }

        async fn history(&self, limit: usize) -> Result<Vec<JobRecord>, QueueError> {
            self.inner.history(limit).await
        }

        async fn purge_completed_before(&self, cutoff: i64) -> Result<u64, QueueError> {
            self.inner.purge_completed_before(cutoff).await
        }

        async fn reset_orphaned(&self) -> Result<u64, QueueError> {
            self.inner.reset_orphaned().await
        }
    }

    fn worker(failures: u32, scratch: &Path) -> (WorkerLoop, Arc<WorkQueue>, Arc<Outbox>) {
        worker_on(Box::new(MemoryJobStore::new()), failures, scratch)
    }

    fn worker_on(
        store: Box<dyn JobStore>,
        failures: u32,
        scratch: &Path,
    ) -> (WorkerLoop, Arc<WorkQueue>, Arc<Outbox>) {
        let queue = Arc::new(WorkQueue::new(
            store,
            Arc::new(FixedClock::new(1_000)),
            Duration::from_secs(3600),
        ));
        let settings = PipelineSettings {
            scratch_dir: scratch.to_path_buf(),
            poll_interval: Duration::from_millis(5),
            ..PipelineSettings::from(&RenderqConfig::default())
        };
        let pipeline = Arc::new(JobPipeline::new(
            Arc::new(FlakyFetcher {
                failures,
                calls: AtomicU32::new(0),
            }),
            Arc::new(InstantRenderer),
            Arc::new(NoStitch),
            settings,
        ));
        let outbox = Arc::new(Outbox::default());
        let worker = WorkerLoop::new(
            Arc::clone(&queue),
            pipeline,
            outbox.clone(),
            RetryPolicy::new(3),
            Duration::ZERO,
        );
        (worker, queue, outbox)
    }

    #[tokio::test]
    async fn successful_job_is_delivered_and_completed() {
        let scratch = tempfile::tempdir().unwrap();
        let (worker, queue, outbox) = worker(0, scratch.path());
        let id = queue.enqueue(new_job("castle.vmax.zip", "")).await.unwrap();
        let job = queue.dequeue().await.unwrap().unwrap();

        let outcome = worker.process(job).await.unwrap();
        assert_eq!(outcome, JobOutcome::Completed);

        let row = queue.job(id).await.unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.retry_count, 0);

        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message, "Here's your rendered image! <@200>");
        let attachment = sent[0].attachment.as_ref().unwrap();
        assert_eq!(attachment.file_name, "castle.jpg");
        assert_eq!(attachment.bytes, Bytes::from_static(b"img"));
        assert_eq!(*worker.state().borrow(), WorkerState::Delivering);
    }

    #[tokio::test]
    async fn failures_retry_then_discard_with_notice() {
        let scratch = tempfile::tempdir().unwrap();
        let (worker, queue, outbox) = worker(u32::MAX, scratch.path());
        let id = queue.enqueue(new_job("castle.vmax.zip", "")).await.unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            let job = queue.dequeue().await.unwrap().unwrap();
            outcomes.push(worker.process(job).await.unwrap());
        }
        assert_eq!(
            outcomes,
            vec![
                JobOutcome::Retrying { attempt: 1, max: 3 },
                JobOutcome::Retrying { attempt: 2, max: 3 },
                JobOutcome::Discarded { retries: 3 },
            ]
        );
        assert!(queue.job(id).await.unwrap().is_none());

        // no notice for transparent retries
        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].message,
            "Failed to download castle.vmax.zip for processing."
        );
    }

    #[tokio::test]
    async fn cancel_before_fetch_removes_row_and_notifies() {
        let scratch = tempfile::tempdir().unwrap();
        let (worker, queue, outbox) = worker(0, scratch.path());
        let id = queue.enqueue(new_job("castle.vmax.zip", "")).await.unwrap();
        let job = queue.dequeue().await.unwrap().unwrap();
        queue.cancel_current().await.unwrap();

        assert_eq!(worker.process(job).await.unwrap(), JobOutcome::Cancelled);
        assert!(queue.job(id).await.unwrap().is_none());
        assert_eq!(queue.cancellation().current_job(), None);
        assert_eq!(
            outbox.sent.lock().unwrap()[0].message,
            "Cancelled render: `castle.vmax.zip`"
        );
    }

    #[tokio::test]
    async fn rejected_completion_is_repeated_before_the_next_job() {
        let scratch = tempfile::tempdir().unwrap();
        let store = FaultyStore::new(1, 0);
        let (worker, queue, _outbox) = worker_on(Box::new(store), 0, scratch.path());
        let worker = worker.with_store_retry(Duration::from_millis(1));
        let first = queue.enqueue(new_job("first.vmax.zip", "")).await.unwrap();
        let second = queue.enqueue(new_job("second.vmax.zip", "")).await.unwrap();

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(worker.process(job).await.unwrap(), JobOutcome::Completed);
        assert_eq!(
            queue.job(first).await.unwrap().unwrap().status,
            JobStatus::Completed
        );

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, second);
        assert_eq!(queue.counts().await.unwrap().processing, 1);
        assert_eq!(
            queue.cancel_current().await.unwrap().as_deref(),
            Some("second.vmax.zip")
        );
    }

    #[tokio::test]
    async fn store_failure_at_shutdown_is_returned() {
        let scratch = tempfile::tempdir().unwrap();
        let store = FaultyStore::new(u32::MAX, 0);
        let (worker, queue, _outbox) = worker_on(Box::new(store), 0, scratch.path());
        let id = queue.enqueue(new_job("a.vmax.zip", "")).await.unwrap();
        let job = queue.dequeue().await.unwrap().unwrap();
        queue.request_shutdown();

        assert!(matches!(worker.process(job).await, Err(QueueError::Io(_))));
        // left for startup recovery
        assert_eq!(
            queue.count_by_id_and_status(id, JobStatus::Processing).await.unwrap(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_dequeue_backs_off_without_idle_pause() {
        let scratch = tempfile::tempdir().unwrap();
        let store = FaultyStore::new(0, u32::MAX);
        let selects = Arc::clone(&store.selects);
        let (worker, queue, _outbox) = worker_on(Box::new(store), 0, scratch.path());
        let handle = tokio::spawn(worker.with_store_retry(Duration::from_secs(1)).run());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let attempts = selects.load(Ordering::SeqCst);
        assert!((3..=5).contains(&attempts), "attempts = {attempts}");

        queue.request_shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_drains_and_stops_on_shutdown() {
        let scratch = tempfile::tempdir().unwrap();
        let (worker, queue, _outbox) = worker(0, scratch.path());
        let mut reports = worker.reports().subscribe();
        let handle = tokio::spawn(worker.run());

        let id = queue.enqueue(new_job("a.vmax.zip", "")).await.unwrap();
        let report = reports.recv().await.unwrap();
        assert_eq!(report, JobReport { job: id, outcome: JobOutcome::Completed });

        queue.request_shutdown();
        handle.await.unwrap();
    }
}
