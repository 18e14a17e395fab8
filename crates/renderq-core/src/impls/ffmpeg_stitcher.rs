//! FfmpegStitcher - encodes an orbit frame sequence into an H.264 video

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::StitchError;
use crate::ports::{FrameSequence, FrameStitcher};

#[derive(Debug, Clone)]
pub struct FfmpegStitcher {
    program: PathBuf,
}

impl FfmpegStitcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(frames: &FrameSequence, output: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-framerate".into(),
            frames.frame_rate.to_string(),
            "-i".into(),
            frames.pattern_path().display().to_string(),
            "-c:v".into(),
            "libx264".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            output.display().to_string(),
        ]
    }
}

impl Default for FfmpegStitcher {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl FrameStitcher for FfmpegStitcher {
    async fn stitch(&self, frames: &FrameSequence, output: &Path) -> Result<(), StitchError> {
        if frames.count == 0 {
            return Err(StitchError::NoFrames);
        }

        debug!(frames = frames.count, output = %output.display(), "stitching frames");
        let out = Command::new(&self.program)
            .args(Self::args(frames, output))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(StitchError::Spawn)?;

        if !out.status.success() {
            return Err(StitchError::Failed {
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_ffmpeg_arguments() {
        let frames = FrameSequence::new("/work/frames", 10);
        let args = FfmpegStitcher::args(&frames, Path::new("/work/out_orbit.mp4"));
        assert_eq!(
            args,
            vec![
                "-y",
                "-loglevel",
                "error",
                "-framerate",
                "30",
                "-i",
                "/work/frames/frame_%04d.jpg",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "/work/out_orbit.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn empty_sequence_is_rejected() {
        let err = FfmpegStitcher::default()
            .stitch(&FrameSequence::new("/nowhere", 0), Path::new("/nowhere/out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, StitchError::NoFrames));
    }

    #[tokio::test]
    async fn failing_program_reports_stderr() {
        let stitcher = FfmpegStitcher::new("false");
        let err = stitcher
            .stitch(&FrameSequence::new("/nowhere", 2), Path::new("/nowhere/out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, StitchError::Failed { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let stitcher = FfmpegStitcher::new("/definitely/not/ffmpeg");
        let err = stitcher
            .stitch(&FrameSequence::new("/nowhere", 2), Path::new("/nowhere/out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, StitchError::Spawn(_)));
    }
}
