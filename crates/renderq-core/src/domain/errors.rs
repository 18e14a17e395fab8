//! Errors - パイプラインのエラー型と分類

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::error::QueueError;

/// ErrorKind は失敗した試行の分類
///
/// # 分類
/// - Transient: ジョブ単位の失敗（retry 方針へ）
/// - Cancelled: 協調的な中断。エラーではなく、retry を消費せずに行を削除
/// - Infrastructure: store 自体の障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Cancelled,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported source locator: {0}")]
    Unsupported(String),

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid archive: {0}")]
    Archive(String),

    #[error("no .vmax scene directory found in archive")]
    MissingScene,

    #[error("staging task aborted: {0}")]
    Aborted(String),
}

impl StagingError {
    pub fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| StagingError::Io { context, source }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to prepare scene: {0}")]
    Prepare(String),

    #[error("failed to start renderer: {0}")]
    Spawn(#[source] io::Error),

    #[error("renderer failed on frame {frame}: {message}")]
    Frame { frame: u32, message: String },

    #[error("renderer produced no output at {0}")]
    MissingOutput(PathBuf),
}

#[derive(Debug, Error)]
pub enum StitchError {
    #[error("failed to run stitcher: {0}")]
    Spawn(#[source] io::Error),

    #[error("stitcher exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("no frames to stitch")]
    NoFrames,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery to {destination} failed: {source}")]
    Io {
        destination: String,
        #[source]
        source: io::Error,
    },

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Every way a single attempt at a job can end other than delivery.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("stitching failed: {0}")]
    Stitch(#[from] StitchError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] NotifyError),

    #[error("could not read artifact {path}: {source}")]
    ArtifactUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error(transparent)]
    Store(#[from] QueueError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Cancelled { .. } => ErrorKind::Cancelled,
            PipelineError::Store(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Transient,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Message for the requester once the job has been given up on.
    pub fn failure_notice(&self, display_name: &str) -> String {
        match self {
            PipelineError::Fetch(_) => {
                format!("Failed to download {display_name} for processing.")
            }
            PipelineError::ArtifactUnreadable { .. } => {
                "Rendering completed but could not read output file.".to_string()
            }
            other => format!("Failed to render {display_name}: {other}"),
        }
    }
}
