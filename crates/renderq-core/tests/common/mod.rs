//! Fake ports and archive helpers shared by the integration scenarios.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use renderq_core::domain::{
    ChannelId, FetchError, NewJob, NotifyError, RenderError, StitchError, UserId,
};
use renderq_core::ports::{
    Delivery, FrameRequest, FrameSequence, FrameStitcher, Notifier, PayloadFetcher, PreparedScene,
    RenderSession, SceneRenderer, SceneRequest,
};
use renderq_core::RenderqConfig;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub fn scene_zip() -> Bytes {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (path, contents) in [
        ("tower.vmax/scene.json", "{}"),
        ("tower.vmax/contents1.vmaxb", "voxels"),
    ] {
        writer.start_file(path, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

pub fn job(name: &str, metadata: &str) -> NewJob {
    NewJob {
        source: format!("https://cdn.example.com/{name}"),
        display_name: name.to_string(),
        destination: ChannelId::from_u64(555),
        requester: UserId::from_u64(42),
        requester_name: "mika".to_string(),
        metadata: metadata.to_string(),
    }
}

pub fn fast_config(scratch: &Path) -> RenderqConfig {
    RenderqConfig {
        poll_interval_ms: 5,
        idle_pause_ms: 0,
        scratch_dir: Some(scratch.to_path_buf()),
        ..RenderqConfig::default()
    }
}

/// Serves the scene archive, failing the first `failures` calls.
#[derive(Clone)]
pub struct FakeFetcher {
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl FakeFetcher {
    pub fn ok() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayloadFetcher for FakeFetcher {
    async fn fetch(&self, source: &str) -> Result<Bytes, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(FetchError::Transport {
                url: source.to_string(),
                message: "connection reset".to_string(),
            });
        }
        Ok(scene_zip())
    }
}

/// Writes every frame after `delay`; records frame requests.
#[derive(Clone, Default)]
pub struct FakeRenderer {
    pub frames: Arc<Mutex<Vec<FrameRequest>>>,
    pub delay: Duration,
}

impl FakeRenderer {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

struct TimedSession {
    done_at: tokio::time::Instant,
    output: std::path::PathBuf,
}

#[async_trait]
impl RenderSession for TimedSession {
    async fn is_rendering(&mut self) -> Result<bool, RenderError> {
        if tokio::time::Instant::now() < self.done_at {
            return Ok(true);
        }
        std::fs::write(&self.output, b"frame").unwrap();
        Ok(false)
    }

    async fn stop(&mut self) -> Result<(), RenderError> {
        Ok(())
    }
}

#[async_trait]
impl SceneRenderer for FakeRenderer {
    async fn prepare_scene(&self, request: SceneRequest<'_>) -> Result<PreparedScene, RenderError> {
        Ok(PreparedScene {
            job: request.job,
            scene_dir: request.scene_dir.to_path_buf(),
            metadata: request.metadata.to_string(),
        })
    }

    async fn start_frame(
        &self,
        _scene: &PreparedScene,
        frame: &FrameRequest,
    ) -> Result<Box<dyn RenderSession>, RenderError> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(Box::new(TimedSession {
            done_at: tokio::time::Instant::now() + self.delay,
            output: frame.output.clone(),
        }))
    }
}

/// Concatenates frames into the output; records frame counts per call.
#[derive(Clone, Default)]
pub struct FakeStitcher {
    pub calls: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl FrameStitcher for FakeStitcher {
    async fn stitch(&self, frames: &FrameSequence, output: &Path) -> Result<(), StitchError> {
        let mut video = Vec::new();
        for i in 0..frames.count {
            video.extend(std::fs::read(frames.frame_path(i)).unwrap());
        }
        std::fs::write(output, video).unwrap();
        self.calls.lock().unwrap().push(frames.count);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeNotifier {
    pub sent: Arc<Mutex<Vec<Delivery>>>,
}

impl FakeNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.message.clone())
            .collect()
    }

    pub fn attachments(&self) -> Vec<(String, usize)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|d| d.attachment.as_ref())
            .map(|a| (a.file_name.clone(), a.bytes.len()))
            .collect()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn deliver(&self, delivery: Delivery) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(delivery);
        Ok(())
    }
}
