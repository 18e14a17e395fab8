//! GcLoop - 保持期間の定期スイープ
//!
//! キュー初期化時と同じ purge を一定間隔で実行する。
//! 長時間動くプロセスでも再起動を待たずに期限切れの行が消える。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::queue::WorkQueue;

pub struct GcLoop {
    queue: Arc<WorkQueue>,
    interval: Duration,
}

impl GcLoop {
    pub fn new(queue: Arc<WorkQueue>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    /// Sweep every `interval` until shutdown. A failed sweep is logged and
    /// retried on the next tick.
    pub async fn run(self) {
        let mut shutdown = self.queue.shutdown_signal();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // startup already swept
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "retention sweep started");
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.queue.purge_expired().await {
                        Ok(purged) => debug!(purged, "retention sweep done"),
                        Err(e) => warn!(error = %e, "retention sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("retention sweep stopped");
    }
}
