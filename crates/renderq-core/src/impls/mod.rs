//! Impls - port の実装
//!
//! # 含まれるもの
//! - **SqliteJobStore**: 本番用の永続 store
//! - **MemoryJobStore**: 同じ契約のインメモリ版（テスト用）
//! - **HttpFetcher**: http(s)/file からの payload 取得
//! - **CommandRenderer**: 外部レンダラーをフレームごとに1プロセス起動
//! - **FfmpegStitcher**: フレーム列を H.264 に
//! - **DirectoryNotifier**: チャットの代わりにローカルの outbox へ書き出す

pub mod command_renderer;
pub mod dir_notifier;
pub mod ffmpeg_stitcher;
pub mod http_fetcher;
pub mod memory_store;
pub mod sqlite_store;

pub use self::command_renderer::CommandRenderer;
pub use self::dir_notifier::DirectoryNotifier;
pub use self::ffmpeg_stitcher::FfmpegStitcher;
pub use self::http_fetcher::HttpFetcher;
pub use self::memory_store::MemoryJobStore;
pub use self::sqlite_store::SqliteJobStore;
