//! Cancellation controller and the checkpoint handed to pipeline stages.
//!
//! The controller is lock-free: the worker polls it at every checkpoint
//! without contending with store operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use crate::domain::{JobId, PipelineError};

/// Tri-state cancel signal for the current job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CancelState {
    None = 0,
    Requested = 1,
    Acknowledged = 2,
}

impl CancelState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CancelState::Requested,
            2 => CancelState::Acknowledged,
            _ => CancelState::None,
        }
    }
}

/// Current job id (0 = none) plus the cancel signal aimed at it.
#[derive(Debug, Default)]
pub struct CancellationController {
    current: AtomicI64,
    state: AtomicU8,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_job(&self) -> Option<JobId> {
        match self.current.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(JobId::new(raw)),
        }
    }

    pub fn state(&self) -> CancelState {
        CancelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_requested(&self) -> bool {
        self.state() == CancelState::Requested
    }

    /// A new job owns the controller. Any leftover signal is dropped.
    pub fn begin(&self, id: JobId) {
        self.state.store(CancelState::None as u8, Ordering::SeqCst);
        self.current.store(id.get(), Ordering::SeqCst);
    }

    /// Ask the pipeline working on `id` to stop. Returns false when `id` is
    /// not the current job.
    pub fn request(&self, id: JobId) -> bool {
        if self.current.load(Ordering::SeqCst) != id.get() {
            return false;
        }
        self.state
            .store(CancelState::Requested as u8, Ordering::SeqCst);
        true
    }

    /// The pipeline unwound. Clears the current job and returns it; `None`
    /// when already acknowledged.
    pub fn acknowledge(&self) -> Option<JobId> {
        let raw = self.current.swap(0, Ordering::SeqCst);
        self.state
            .store(CancelState::Acknowledged as u8, Ordering::SeqCst);
        (raw != 0).then(|| JobId::new(raw))
    }

    /// The job left the pipeline normally (completed or failed).
    pub fn finish(&self, id: JobId) {
        if self
            .current
            .compare_exchange(id.get(), 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.state.store(CancelState::None as u8, Ordering::SeqCst);
        }
    }
}

/// The single cancellation check passed into every pipeline stage.
///
/// ```ignore
/// checkpoint.check("fetch")?;
/// ```
#[derive(Debug, Clone)]
pub struct Checkpoint {
    job: JobId,
    controller: Arc<CancellationController>,
}

impl Checkpoint {
    pub fn new(job: JobId, controller: Arc<CancellationController>) -> Self {
        Self { job, controller }
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    pub fn is_cancelled(&self) -> bool {
        self.controller.is_requested() && self.controller.current_job() == Some(self.job)
    }

    pub fn check(&self, stage: &'static str) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled { stage });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_targets_only_the_current_job() {
        let c = CancellationController::new();
        assert!(!c.request(JobId::new(1)));

        c.begin(JobId::new(1));
        assert!(!c.request(JobId::new(2)));
        assert!(c.request(JobId::new(1)));
        assert_eq!(c.state(), CancelState::Requested);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let c = CancellationController::new();
        c.begin(JobId::new(5));
        c.request(JobId::new(5));

        assert_eq!(c.acknowledge(), Some(JobId::new(5)));
        assert_eq!(c.state(), CancelState::Acknowledged);
        assert_eq!(c.current_job(), None);
        assert_eq!(c.acknowledge(), None);
    }

    #[test]
    fn stale_request_does_not_reach_next_job() {
        let c = Arc::new(CancellationController::new());
        c.begin(JobId::new(1));
        c.request(JobId::new(1));
        // job 1 got past its last checkpoint and completed anyway
        c.finish(JobId::new(1));

        c.begin(JobId::new(2));
        let checkpoint = Checkpoint::new(JobId::new(2), Arc::clone(&c));
        assert!(checkpoint.check("fetch").is_ok());
    }

    #[test]
    fn checkpoint_reports_stage() {
        let c = Arc::new(CancellationController::new());
        c.begin(JobId::new(9));
        let checkpoint = Checkpoint::new(JobId::new(9), Arc::clone(&c));
        assert!(checkpoint.check("staging").is_ok());

        c.request(JobId::new(9));
        let err = checkpoint.check("frame").unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { stage: "frame" }));
    }

    #[test]
    fn finish_ignores_other_jobs() {
        let c = CancellationController::new();
        c.begin(JobId::new(3));
        c.finish(JobId::new(4));
        assert_eq!(c.current_job(), Some(JobId::new(3)));
    }
}
