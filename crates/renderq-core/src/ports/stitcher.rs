//! FrameStitcher port - 連番フレームを1本の動画にまとめる

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::StitchError;

/// printf-style name of every orbit frame.
pub const FRAME_PATTERN: &str = "frame_%04d.jpg";

/// Frames per second of the stitched video.
pub const FRAME_RATE: u32 = 30;

/// A directory of frames named after [`FRAME_PATTERN`], starting at 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequence {
    pub dir: PathBuf,
    pub count: u32,
    pub frame_rate: u32,
}

impl FrameSequence {
    pub fn new(dir: impl Into<PathBuf>, count: u32) -> Self {
        Self {
            dir: dir.into(),
            count,
            frame_rate: FRAME_RATE,
        }
    }

    pub fn frame_name(index: u32) -> String {
        format!("frame_{index:04}.jpg")
    }

    pub fn frame_path(&self, index: u32) -> PathBuf {
        self.dir.join(Self::frame_name(index))
    }

    /// Input argument for tools that take a printf pattern.
    pub fn pattern_path(&self) -> PathBuf {
        self.dir.join(FRAME_PATTERN)
    }
}

#[async_trait]
pub trait FrameStitcher: Send + Sync {
    async fn stitch(&self, frames: &FrameSequence, output: &Path) -> Result<(), StitchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_names_are_zero_padded() {
        let seq = FrameSequence::new("/tmp/frames", 3);
        assert_eq!(FrameSequence::frame_name(7), "frame_0007.jpg");
        assert_eq!(seq.frame_path(12), PathBuf::from("/tmp/frames/frame_0012.jpg"));
        assert_eq!(seq.pattern_path(), PathBuf::from("/tmp/frames/frame_%04d.jpg"));
        assert_eq!(seq.frame_rate, 30);
    }
}
