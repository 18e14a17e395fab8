//! CommandRenderer - runs an external renderer program once per frame
//!
//! # Invocation
//! `<program> <args..> --scene <dir> --output <file> --frame <n> --yaw <deg> [--size <px>]`
//!
//! The program must write `<file>` and exit 0. Progress is observed with
//! `try_wait`, so the worker can keep polling for cancellation while the
//! render runs.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::domain::RenderError;
use crate::ports::{FrameRequest, PreparedScene, RenderSession, SceneRenderer, SceneRequest};

#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Fixed arguments placed before the per-frame ones.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command(&self, scene: &PreparedScene, frame: &FrameRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--scene")
            .arg(&scene.scene_dir)
            .arg("--output")
            .arg(&frame.output)
            .arg("--frame")
            .arg(frame.index.to_string())
            .arg("--yaw")
            .arg(format!("{:.4}", frame.yaw_degrees));
        if let Some(size) = frame.size {
            cmd.arg("--size").arg(size.to_string());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SceneRenderer for CommandRenderer {
    async fn prepare_scene(&self, request: SceneRequest<'_>) -> Result<PreparedScene, RenderError> {
        let meta = tokio::fs::metadata(request.scene_dir)
            .await
            .map_err(|e| RenderError::Prepare(format!("{}: {e}", request.scene_dir.display())))?;
        if !meta.is_dir() {
            return Err(RenderError::Prepare(format!(
                "{} is not a directory",
                request.scene_dir.display()
            )));
        }

        Ok(PreparedScene {
            job: request.job,
            scene_dir: request.scene_dir.to_path_buf(),
            metadata: request.metadata.to_string(),
        })
    }

    async fn start_frame(
        &self,
        scene: &PreparedScene,
        frame: &FrameRequest,
    ) -> Result<Box<dyn RenderSession>, RenderError> {
        let child = self.command(scene, frame).spawn().map_err(RenderError::Spawn)?;
        debug!(job = %scene.job, frame = frame.index, pid = ?child.id(), "renderer started");
        Ok(Box::new(ChildSession {
            child,
            frame: frame.index,
        }))
    }
}

struct ChildSession {
    child: Child,
    frame: u32,
}

#[async_trait]
impl RenderSession for ChildSession {
    async fn is_rendering(&mut self) -> Result<bool, RenderError> {
        let status = self.child.try_wait().map_err(|e| RenderError::Frame {
            frame: self.frame,
            message: e.to_string(),
        })?;
        match status {
            None => Ok(true),
            Some(status) if status.success() => Ok(false),
            Some(status) => Err(RenderError::Frame {
                frame: self.frame,
                message: format!("renderer exited with {status}"),
            }),
        }
    }

    async fn stop(&mut self) -> Result<(), RenderError> {
        self.child.kill().await.map_err(|e| RenderError::Frame {
            frame: self.frame,
            message: format!("failed to stop renderer: {e}"),
        })
    }
}
