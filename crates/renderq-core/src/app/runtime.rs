//! Runtime - the running application
//!
//! Owns the spawned worker (and retention sweep) and exposes the producer
//! interface (`submit`) and the control surface.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::app::status::ControlSurface;
use crate::app::worker_loop::JobReport;
use crate::domain::{JobId, NewJob, WorkerState};
use crate::error::QueueError;
use crate::ports::{Delivery, Notifier};
use crate::queue::WorkQueue;

pub struct Runtime {
    queue: Arc<WorkQueue>,
    control: ControlSurface,
    notifier: Arc<dyn Notifier>,
    state: watch::Receiver<WorkerState>,
    reports: broadcast::Sender<JobReport>,
    worker: JoinHandle<()>,
    gc: Option<JoinHandle<()>>,
}

impl Runtime {
    pub(crate) fn new(
        queue: Arc<WorkQueue>,
        control: ControlSurface,
        notifier: Arc<dyn Notifier>,
        state: watch::Receiver<WorkerState>,
        reports: broadcast::Sender<JobReport>,
        worker: JoinHandle<()>,
        gc: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            queue,
            control,
            notifier,
            state,
            reports,
            worker,
            gc,
        }
    }

    /// Producer interface: persist the job, wake the worker, and acknowledge
    /// in the destination channel.
    ///
    /// The acknowledgement is best effort; the job is queued either way.
    pub async fn submit(&self, job: NewJob) -> Result<JobId, QueueError> {
        let destination = job.destination;
        let notice = format!(
            "Render request received! Adding `{}` to the render queue...",
            job.display_name
        );
        let id = self.queue.enqueue(job).await?;
        if let Err(e) = self.notifier.deliver(Delivery::text(destination, notice)).await {
            warn!(job = %id, error = %e, "failed to acknowledge submission");
        }
        Ok(id)
    }

    pub fn control(&self) -> &ControlSurface {
        &self.control
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn worker_state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Outcome of every job the worker finishes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobReport> {
        self.reports.subscribe()
    }

    /// Stop taking jobs, let the in-flight one drain, and wait for the
    /// background tasks to exit.
    pub async fn shutdown(self) {
        info!(state = %self.worker_state(), "shutting down");
        self.queue.request_shutdown();
        if let Err(e) = self.worker.await {
            warn!(error = %e, "worker task ended abnormally");
        }
        if let Some(gc) = self.gc {
            if let Err(e) = gc.await {
                warn!(error = %e, "retention sweep ended abnormally");
            }
        }
        info!("shutdown complete");
    }
}
