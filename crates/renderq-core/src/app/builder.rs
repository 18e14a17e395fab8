//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 不足している port を最初の1つで止めずに全部列挙する

use std::sync::Arc;

use tracing::info;

use crate::app::gc_loop::GcLoop;
use crate::app::pipeline::{JobPipeline, PipelineSettings};
use crate::app::runtime::Runtime;
use crate::app::status::{AdminAllowList, ControlSurface};
use crate::app::worker_loop::WorkerLoop;
use crate::config::RenderqConfig;
use crate::domain::UserId;
use crate::error::QueueError;
use crate::ports::{Clock, FrameStitcher, JobStore, Notifier, PayloadFetcher, SceneRenderer, SystemClock};
use crate::queue::{RetryPolicy, WorkQueue};

/// AppBuilder はキュー・worker・制御インターフェースを組み立てる
///
/// # 使用例
/// ```ignore
/// let runtime = AppBuilder::new()
///     .store(SqliteJobStore::open("renderq.db").await?)
///     .fetcher(HttpFetcher::new()?)
///     .renderer(CommandRenderer::new("vmax-render"))
///     .stitcher(FfmpegStitcher::default())
///     .notifier(DirectoryNotifier::new("outbox"))
///     .build()?
///     .start()
///     .await?;
/// ```
pub struct AppBuilder {
    store: Option<Box<dyn JobStore>>,
    fetcher: Option<Arc<dyn PayloadFetcher>>,
    renderer: Option<Arc<dyn SceneRenderer>>,
    stitcher: Option<Arc<dyn FrameStitcher>>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Arc<dyn Clock>,
    config: RenderqConfig,
    admins: Vec<UserId>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing ports: {0:?}. These must be provided before build().")]
    MissingPorts(Vec<&'static str>),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            fetcher: None,
            renderer: None,
            stitcher: None,
            notifier: None,
            clock: Arc::new(SystemClock),
            config: RenderqConfig::default(),
            admins: Vec::new(),
        }
    }

    pub fn store(mut self, store: impl JobStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn fetcher(mut self, fetcher: impl PayloadFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn renderer(mut self, renderer: impl SceneRenderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn stitcher(mut self, stitcher: impl FrameStitcher + 'static) -> Self {
        self.stitcher = Some(Arc::new(stitcher));
        self
    }

    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: RenderqConfig) -> Self {
        self.config = config;
        self
    }

    pub fn admins(mut self, admins: impl IntoIterator<Item = UserId>) -> Self {
        self.admins = admins.into_iter().collect();
        self
    }

    /// Wire everything together. Nothing runs until [`App::start`].
    ///
    /// # Errors
    /// `BuildError::MissingPorts` lists every port that was not provided.
    pub fn build(self) -> Result<App, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("store");
        }
        if self.fetcher.is_none() {
            missing.push("fetcher");
        }
        if self.renderer.is_none() {
            missing.push("renderer");
        }
        if self.stitcher.is_none() {
            missing.push("stitcher");
        }
        if self.notifier.is_none() {
            missing.push("notifier");
        }

        let (Some(store), Some(fetcher), Some(renderer), Some(stitcher), Some(notifier)) = (
            self.store,
            self.fetcher,
            self.renderer,
            self.stitcher,
            self.notifier,
        ) else {
            return Err(BuildError::MissingPorts(missing));
        };

        let config = self.config;
        let queue = Arc::new(WorkQueue::new(
            store,
            Arc::clone(&self.clock),
            config.retention(),
        ));
        let pipeline = Arc::new(JobPipeline::new(
            fetcher,
            renderer,
            stitcher,
            PipelineSettings::from(&config),
        ));
        let worker = WorkerLoop::new(
            Arc::clone(&queue),
            pipeline,
            Arc::clone(&notifier),
            RetryPolicy::new(config.max_retries),
            config.idle_pause(),
        );
        let gc = config
            .gc_interval()
            .map(|interval| GcLoop::new(Arc::clone(&queue), interval));
        let control = ControlSurface::new(
            Arc::clone(&queue),
            self.clock,
            AdminAllowList::new(self.admins),
            config.history_limit,
        );

        Ok(App {
            queue,
            worker,
            gc,
            control,
            notifier,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A fully wired application that has not started yet.
pub struct App {
    queue: Arc<WorkQueue>,
    worker: WorkerLoop,
    gc: Option<GcLoop>,
    control: ControlSurface,
    notifier: Arc<dyn Notifier>,
}

impl App {
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run startup recovery, then spawn the worker (and the retention sweep
    /// when configured).
    ///
    /// # Errors
    /// Store failures during recovery are fatal.
    pub async fn start(self) -> Result<Runtime, QueueError> {
        let report = self.queue.initialize().await?;
        info!(purged = report.purged, reset = report.reset, "starting worker");

        let state = self.worker.state();
        let reports = self.worker.reports();
        let worker = tokio::spawn(self.worker.run());
        let gc = self.gc.map(|gc| tokio::spawn(gc.run()));

        Ok(Runtime::new(
            self.queue,
            self.control,
            self.notifier,
            state,
            reports,
            worker,
            gc,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{DirectoryNotifier, FfmpegStitcher, HttpFetcher, MemoryJobStore};

    #[test]
    fn build_reports_every_missing_port() {
        let err = AppBuilder::new()
            .store(MemoryJobStore::new())
            .stitcher(FfmpegStitcher::default())
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BuildError::MissingPorts(missing) if missing == vec!["fetcher", "renderer", "notifier"]
        ));
    }

    #[test]
    fn build_with_all_ports() {
        let outbox = tempfile::tempdir().unwrap();
        let app = AppBuilder::new()
            .store(MemoryJobStore::new())
            .fetcher(HttpFetcher::new().unwrap())
            .renderer(crate::impls::CommandRenderer::new("true"))
            .stitcher(FfmpegStitcher::default())
            .notifier(DirectoryNotifier::new(outbox.path()))
            .build();
        assert!(app.is_ok());
    }
}
