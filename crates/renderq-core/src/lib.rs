//! renderq-core
//!
//! Core building blocks for the renderq render queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, options, outcome, decision, state, errors）
//! - **ports**: 抽象化レイヤー（JobStore, PayloadFetcher, SceneRenderer, FrameStitcher, Notifier, Clock）
//! - **impls**: 実装（SQLite/インメモリ store, HTTP fetcher, 外部レンダラー, ffmpeg, outbox notifier）
//! - **queue**: 永続キューのファサード、リトライ方針、キャンセル制御
//! - **app**: アプリケーションロジック（builder, runtime, worker_loop, pipeline, gc_loop, status）
//! - **config**: 設定値とデフォルト
//! - **observability**: キューと履歴の読み取り専用ビュー

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{AppBuilder, ControlSurface, Runtime};
pub use config::{ConfigError, RenderqConfig};
pub use error::QueueError;
pub use queue::WorkQueue;
