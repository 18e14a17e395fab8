//! SceneRenderer port - 外部のシーンビルダー兼レンダラー
//!
//! レンダラーは再入不可として扱う。
//! 単一の worker が同時に持つ `RenderSession` は常に1つ以下。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{JobId, RenderError};

/// Input to scene preparation.
#[derive(Debug, Clone, Copy)]
pub struct SceneRequest<'a> {
    pub job: JobId,
    /// Working directory holding the staged `.vmax` scene.
    pub scene_dir: &'a Path,
    /// Free-text job metadata, passed through untouched.
    pub metadata: &'a str,
}

/// A scene the renderer accepted and can produce frames from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedScene {
    pub job: JobId,
    pub scene_dir: PathBuf,
    pub metadata: String,
}

/// One frame to render.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    /// Zero-based frame index; always 0 for a still.
    pub index: u32,
    pub output: PathBuf,
    /// Square output size in pixels; `None` keeps the scene's own resolution.
    pub size: Option<u32>,
    /// Camera rotation around the scene's vertical axis, in degrees.
    pub yaw_degrees: f64,
}

#[async_trait]
pub trait SceneRenderer: Send + Sync {
    async fn prepare_scene(&self, request: SceneRequest<'_>) -> Result<PreparedScene, RenderError>;

    /// Start rendering one frame. The returned session is polled until done.
    async fn start_frame(
        &self,
        scene: &PreparedScene,
        frame: &FrameRequest,
    ) -> Result<Box<dyn RenderSession>, RenderError>;
}

/// A render in progress.
#[async_trait]
pub trait RenderSession: Send {
    /// `Ok(false)` once the frame is finished; errors if the render failed.
    async fn is_rendering(&mut self) -> Result<bool, RenderError>;

    /// Abort the render. Called when cancellation is observed mid-frame.
    async fn stop(&mut self) -> Result<(), RenderError>;
}
