//! Ports - 抽象化レイヤー
//!
//! 各 trait が外部の協力者1つとの境界（永続 store, payload の取得元,
//! レンダラー, 動画 stitcher, チャットのチャンネル）。
//! 実装は `impls` にあり、テストでは fake に差し替える。

pub mod clock;
pub mod fetcher;
pub mod job_store;
pub mod notifier;
pub mod renderer;
pub mod stitcher;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::fetcher::PayloadFetcher;
pub use self::job_store::JobStore;
pub use self::notifier::{Attachment, Delivery, Notifier};
pub use self::renderer::{FrameRequest, PreparedScene, RenderSession, SceneRenderer, SceneRequest};
pub use self::stitcher::{FRAME_PATTERN, FRAME_RATE, FrameSequence, FrameStitcher};
