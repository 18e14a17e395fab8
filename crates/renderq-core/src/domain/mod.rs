//! Domain - ドメインモデル（ids, job, options, outcome, decision, state, errors）

pub mod decision;
pub mod errors;
pub mod ids;
pub mod job;
pub mod options;
pub mod outcome;
pub mod state;

pub use decision::RetryDecision;
pub use errors::{
    ErrorKind, FetchError, NotifyError, PipelineError, RenderError, StagingError, StitchError,
};
pub use ids::{ChannelId, JobId, UserId};
pub use job::{JobRecord, JobStatus, NewJob, UnknownStatus};
pub use options::{MAX_ORBIT_FRAMES, MIN_ORBIT_FRAMES, RenderOptions};
pub use outcome::{ArtifactKind, JobOutcome};
pub use state::WorkerState;
