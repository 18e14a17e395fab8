use thiserror::Error;

use crate::domain::JobId;

/// Errors raised by the persistent store and the queue façade.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("failed to prepare store location: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(JobId),

    #[error("corrupt row for {id}: {reason}")]
    CorruptRow { id: JobId, reason: String },
}
