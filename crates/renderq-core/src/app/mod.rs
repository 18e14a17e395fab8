//! App - アプリケーション層
//!
//! ports を組み合わせて動くサービスにする。
//!
//! # 構成
//! - **AppBuilder**: ワイヤリングと起動時検証
//! - **Runtime**: submit, 制御インターフェース, shutdown
//! - **WorkerLoop**: dequeue → pipeline → 配送 → store 更新
//! - **JobPipeline**: fetch, staging, render, stitch
//! - **GcLoop**: 保持期間を過ぎた行の定期削除
//! - **ControlSurface**: キュー/履歴の表示とキャンセル

pub mod builder;
pub mod gc_loop;
pub mod pipeline;
pub mod runtime;
pub mod staging;
pub mod status;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::gc_loop::GcLoop;
pub use self::pipeline::{JobPipeline, PipelineSettings, RenderedArtifact};
pub use self::runtime::Runtime;
pub use self::status::{AdminAllowList, CancelReply, ControlSurface, format_elapsed};
pub use self::worker_loop::{JobReport, WorkerLoop};
