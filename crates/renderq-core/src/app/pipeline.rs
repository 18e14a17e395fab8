//! JobPipeline - dequeue から配送までのジョブ単位の処理
//!
//! # ステージ
//! 1. payload の fetch
//! 2. ジョブ専用の scratch ディレクトリへ staging
//! 3. シーンの準備
//! 4. 静止画1枚、または orbit の全フレームを render して stitch
//!
//! ステージ間とフレーム render 中に [`Checkpoint`] を確認する。
//! scratch のパスはすべて `tempfile` のガードなので、どのステージの `?` でも削除される。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::app::staging::{self, base_name};
use crate::config::RenderqConfig;
use crate::domain::{ArtifactKind, JobRecord, PipelineError, RenderError};
use crate::ports::{
    FrameRequest, FrameSequence, FrameStitcher, PayloadFetcher, PreparedScene, SceneRenderer,
    SceneRequest,
};
use crate::queue::{Checkpoint, WorkQueue};

/// Render parameters taken from [`RenderqConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub scratch_dir: PathBuf,
    pub poll_interval: Duration,
    pub frame_size: u32,
    pub orbit_step_degrees: f64,
    pub orbit_start_degrees: f64,
}

impl From<&RenderqConfig> for PipelineSettings {
    fn from(config: &RenderqConfig) -> Self {
        Self {
            scratch_dir: config.scratch_root(),
            poll_interval: config.poll_interval(),
            frame_size: config.orbit_frame_size,
            orbit_step_degrees: config.orbit_step_degrees,
            orbit_start_degrees: config.orbit_start_degrees,
        }
    }
}

impl PipelineSettings {
    /// Absolute camera yaw for orbit frame `index`.
    pub fn yaw_for(&self, index: u32) -> f64 {
        self.orbit_start_degrees + self.orbit_step_degrees * f64::from(index)
    }
}

/// The finished output of one pipeline run.
///
/// Owns the output directory; dropping the artifact removes the file.
#[derive(Debug)]
pub struct RenderedArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub file_name: String,
    _dir: TempDir,
}

impl RenderedArtifact {
    pub async fn read(&self) -> Result<Bytes, PipelineError> {
        tokio::fs::read(&self.path)
            .await
            .map(Bytes::from)
            .map_err(|source| PipelineError::ArtifactUnreadable {
                path: self.path.clone(),
                source,
            })
    }
}

pub struct JobPipeline {
    fetcher: Arc<dyn PayloadFetcher>,
    renderer: Arc<dyn SceneRenderer>,
    stitcher: Arc<dyn FrameStitcher>,
    settings: PipelineSettings,
}

impl JobPipeline {
    pub fn new(
        fetcher: Arc<dyn PayloadFetcher>,
        renderer: Arc<dyn SceneRenderer>,
        stitcher: Arc<dyn FrameStitcher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            stitcher,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Download the payload. A failure ends this attempt; it is never
    /// retried inline.
    #[instrument(skip_all, fields(job = %job.id))]
    pub async fn fetch(&self, job: &JobRecord, checkpoint: &Checkpoint) -> Result<Bytes, PipelineError> {
        checkpoint.check("fetch")?;
        let payload = self.fetcher.fetch(&job.source).await?;
        debug!(bytes = payload.len(), "payload fetched");
        Ok(payload)
    }

    /// Stage the payload and render it.
    ///
    /// Stamps the render start time on the job once the scene is accepted.
    #[instrument(skip_all, fields(job = %job.id, name = %job.display_name))]
    pub async fn render(
        &self,
        queue: &WorkQueue,
        job: &JobRecord,
        payload: Bytes,
        checkpoint: &Checkpoint,
    ) -> Result<RenderedArtifact, PipelineError> {
        checkpoint.check("staging")?;
        let staged = staging::stage(self.settings.scratch_dir.clone(), job.id, payload).await?;

        checkpoint.check("scene")?;
        let scene = self
            .renderer
            .prepare_scene(SceneRequest {
                job: job.id,
                scene_dir: staged.scene_dir(),
                metadata: &job.metadata,
            })
            .await?;
        queue.mark_render_started(job.id).await?;

        let base = base_name(&job.display_name);
        let options = job.options();
        let (kind, path) = match options.orbit_frames {
            Some(frames) => {
                info!(frames, "rendering orbit animation");
                let path = self
                    .render_orbit(&scene, staged.output_dir(), base, frames, checkpoint)
                    .await?;
                (ArtifactKind::Animation { frames }, path)
            }
            None => {
                info!("rendering still image");
                let path = self
                    .render_still(&scene, staged.output_dir(), base, checkpoint)
                    .await?;
                (ArtifactKind::Still, path)
            }
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| base.to_string());
        Ok(RenderedArtifact {
            kind,
            path,
            file_name,
            _dir: staged.into_output(),
        })
    }

    async fn render_still(
        &self,
        scene: &PreparedScene,
        output_dir: &Path,
        base: &str,
        checkpoint: &Checkpoint,
    ) -> Result<PathBuf, PipelineError> {
        let frame = FrameRequest {
            index: 0,
            output: output_dir.join(format!("{base}.jpg")),
            size: None,
            yaw_degrees: self.settings.orbit_start_degrees,
        };
        self.render_frame(scene, &frame, checkpoint).await?;
        Ok(frame.output)
    }

    async fn render_orbit(
        &self,
        scene: &PreparedScene,
        output_dir: &Path,
        base: &str,
        frames: u32,
        checkpoint: &Checkpoint,
    ) -> Result<PathBuf, PipelineError> {
        let sequence = FrameSequence::new(output_dir, frames);
        for index in 0..frames {
            let frame = FrameRequest {
                index,
                output: sequence.frame_path(index),
                size: Some(self.settings.frame_size),
                yaw_degrees: self.settings.yaw_for(index),
            };
            self.render_frame(scene, &frame, checkpoint).await?;
            debug!(frame = index, of = frames, "frame rendered");
        }

        checkpoint.check("stitch")?;
        let video = output_dir.join(format!("{base}_orbit.mp4"));
        self.stitcher.stitch(&sequence, &video).await?;
        remove_frames(&sequence).await;
        verify_output(&video).await?;
        Ok(video)
    }

    /// Start one frame and wait for it, polling for cancellation.
    async fn render_frame(
        &self,
        scene: &PreparedScene,
        frame: &FrameRequest,
        checkpoint: &Checkpoint,
    ) -> Result<(), PipelineError> {
        checkpoint.check("frame")?;
        let mut session = self.renderer.start_frame(scene, frame).await?;

        while session.is_rendering().await? {
            if checkpoint.is_cancelled() {
                if let Err(e) = session.stop().await {
                    warn!(frame = frame.index, error = %e, "failed to stop renderer");
                }
                return Err(PipelineError::Cancelled { stage: "render" });
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        verify_output(&frame.output).await
    }
}

async fn verify_output(path: &Path) -> Result<(), PipelineError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(RenderError::MissingOutput(path.to_path_buf()).into()),
    }
}

/// Frames are intermediates; failing to remove one is not a job failure.
async fn remove_frames(sequence: &FrameSequence) {
    for index in 0..sequence.count {
        let path = sequence.frame_path(index);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "failed to remove frame");
        }
    }
}
