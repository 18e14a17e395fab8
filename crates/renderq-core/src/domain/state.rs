//! State - worker ループの状態
//!
//! # 状態遷移
//! - idle -> fetching: ジョブを dequeue した
//! - fetching -> pipelining: payload を取得した
//! - pipelining -> delivering: 成果物ができた
//! - fetching/pipelining -> cancelling: checkpoint でキャンセルを検知
//! - 処理中の各状態 -> failed: 試行が失敗し retry 判定へ
//! - delivering/cancelling/failed -> idle

use std::fmt;

use serde::{Deserialize, Serialize};

/// WorkerState は単一 worker の現在の状態を表現
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    #[default]
    Idle,
    Fetching,
    Pipelining,
    Delivering,
    Cancelling,
    Failed,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Fetching => "fetching",
            WorkerState::Pipelining => "pipelining",
            WorkerState::Delivering => "delivering",
            WorkerState::Cancelling => "cancelling",
            WorkerState::Failed => "failed",
        }
    }

    /// Whether a job is currently owned by the worker.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            WorkerState::Fetching | WorkerState::Pipelining | WorkerState::Delivering
        )
    }

    /// States from which a cancel request can be honoured.
    pub fn is_cancellable(self) -> bool {
        matches!(self, WorkerState::Fetching | WorkerState::Pipelining)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
