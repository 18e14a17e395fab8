//! DirectoryNotifier - ローカルの outbox ディレクトリへ配送
//!
//! # レイアウト
//! - `<outbox>/<channel>/messages.log`: 1メッセージ1行
//! - `<outbox>/<channel>/<file_name>`: 添付ファイル（再配送時は上書き）

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::domain::NotifyError;
use crate::ports::{Delivery, Notifier};

pub const MESSAGE_LOG: &str = "messages.log";

#[derive(Debug, Clone)]
pub struct DirectoryNotifier {
    root: PathBuf,
}

impl DirectoryNotifier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn channel_dir(&self, delivery: &Delivery) -> PathBuf {
        self.root.join(delivery.destination.as_u64().to_string())
    }
}

/// Only the final path component of an attachment name is honoured.
fn safe_file_name(name: &str) -> Option<&str> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
}

#[async_trait]
impl Notifier for DirectoryNotifier {
    async fn deliver(&self, delivery: Delivery) -> Result<(), NotifyError> {
        let dir = self.channel_dir(&delivery);
        let io_err = |source| NotifyError::Io {
            destination: delivery.destination.to_string(),
            source,
        };

        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;

        if let Some(attachment) = &delivery.attachment {
            let name = safe_file_name(&attachment.file_name).ok_or_else(|| {
                NotifyError::Rejected(format!("invalid attachment name {:?}", attachment.file_name))
            })?;
            tokio::fs::write(dir.join(name), &attachment.bytes)
                .await
                .map_err(io_err)?;
        }

        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(MESSAGE_LOG))
            .await
            .map_err(io_err)?;
        let line = format!("{}\n", delivery.message.replace('\n', " "));
        log.write_all(line.as_bytes()).await.map_err(io_err)?;
        log.flush().await.map_err(io_err)?;

        info!(
            destination = %delivery.destination,
            attachment = delivery.attachment.as_ref().map(|a| a.file_name.as_str()),
            "message delivered"
        );
        Ok(())
    }
}
