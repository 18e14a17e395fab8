//! Status - 制御インターフェース（キュー一覧、履歴、キャンセル）
//!
//! # ビュー
//! - **list_queue**: processing の行、続けて pending を FIFO 順で
//! - **list_history**: 開始・終了時刻が揃った completed の行を新しい順で
//!
//! 権限判定は呼び出し側の責務。`cancel_current` は判定結果を bool で受け取る。
//! 通常は [`AdminAllowList::authorize`] で得る。

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::UserId;
use crate::error::QueueError;
use crate::observability::{HistoryEntry, QueueEntry};
use crate::ports::Clock;
use crate::queue::WorkQueue;

/// Users allowed to cancel any job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminAllowList {
    admins: HashSet<UserId>,
}

impl AdminAllowList {
    pub fn new(admins: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }

    /// Admins may cancel anything; everyone else only their own job.
    pub fn authorize(&self, requester: UserId, owner: Option<UserId>) -> bool {
        self.is_admin(requester) || owner == Some(requester)
    }
}

/// Result of a cancel command, rendered as the reply text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reply", content = "name", rename_all = "snake_case")]
pub enum CancelReply {
    Denied,
    Cancelling(String),
    NothingRunning,
}

impl fmt::Display for CancelReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReply::Denied => {
                f.write_str("Access denied. You can only cancel your own jobs (or be an admin).")
            }
            CancelReply::Cancelling(name) => write!(f, "Cancelling render: `{name}`"),
            CancelReply::NothingRunning => f.write_str("No job is currently being processed."),
        }
    }
}

/// `75` -> `"1m 15s"`, `9` -> `"9s"`.
pub fn format_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    let (minutes, seconds) = (secs / 60, secs % 60);
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub struct ControlSurface {
    queue: Arc<WorkQueue>,
    clock: Arc<dyn Clock>,
    admins: AdminAllowList,
    history_limit: usize,
}

impl ControlSurface {
    pub fn new(
        queue: Arc<WorkQueue>,
        clock: Arc<dyn Clock>,
        admins: AdminAllowList,
        history_limit: usize,
    ) -> Self {
        Self {
            queue,
            clock,
            admins,
            history_limit,
        }
    }

    pub fn admins(&self) -> &AdminAllowList {
        &self.admins
    }

    pub async fn list_queue(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.queue.list_queue().await
    }

    /// `None` uses the configured default limit.
    pub async fn list_history(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>, QueueError> {
        self.queue
            .list_history(limit.unwrap_or(self.history_limit))
            .await
    }

    pub async fn current_job_owner(&self) -> Result<Option<UserId>, QueueError> {
        self.queue.current_job_owner().await
    }

    /// Flag the processing job for cancellation. `authorized` is the
    /// caller's verdict.
    pub async fn cancel_current(&self, authorized: bool) -> Result<CancelReply, QueueError> {
        if !authorized {
            return Ok(CancelReply::Denied);
        }
        Ok(match self.queue.cancel_current().await? {
            Some(name) => CancelReply::Cancelling(name),
            None => CancelReply::NothingRunning,
        })
    }

    /// Authorize `requester` against the allow-list and the job owner, then
    /// cancel.
    pub async fn request_cancel(&self, requester: UserId) -> Result<CancelReply, QueueError> {
        let owner = self.current_job_owner().await?;
        let authorized = self.admins.authorize(requester, owner);
        self.cancel_current(authorized).await
    }

    /// Chat-ready queue listing.
    pub fn render_queue(&self, entries: &[QueueEntry]) -> String {
        if entries.is_empty() {
            return "No queued jobs! Any .vmax.zip file you send will be processed immediately!"
                .to_string();
        }

        let now = self.clock.now();
        let mut position = 1;
        let mut out = String::new();
        for entry in entries {
            if entry.is_processing {
                let elapsed = if entry.started_at > 0 {
                    format!(" ({})", format_elapsed(now - entry.started_at))
                } else {
                    String::new()
                };
                out.push_str(&format!(
                    "**Rendering:** `{}` - {}{}\n",
                    entry.display_name, entry.requester_name, elapsed
                ));
            } else {
                out.push_str(&format!(
                    "{position}. `{}` - {}\n",
                    entry.display_name, entry.requester_name
                ));
                position += 1;
            }
        }
        out
    }

    /// Chat-ready history listing.
    pub fn render_history(&self, entries: &[HistoryEntry]) -> String {
        if entries.is_empty() {
            return "No completed renders found in history.".to_string();
        }

        let mut out = String::from("**Recent Completed Renders:**\n\n");
        for entry in entries {
            let secs = entry.duration_secs();
            let timing = if secs > 0 {
                format_elapsed(secs)
            } else {
                "timing data incomplete".to_string()
            };
            out.push_str(&format!(
                "`{}` - {} ⏱️ {}\n",
                entry.display_name, entry.requester_name, timing
            ));
        }
        out
    }
}
