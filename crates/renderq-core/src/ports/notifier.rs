//! Notifier port - 宛先チャンネルへのメッセージと成果物の配送

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::{ChannelId, NotifyError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub destination: ChannelId,
    pub message: String,
    pub attachment: Option<Attachment>,
}

impl Delivery {
    pub fn text(destination: ChannelId, message: impl Into<String>) -> Self {
        Self {
            destination,
            message: message.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, file_name: impl Into<String>, bytes: Bytes) -> Self {
        self.attachment = Some(Attachment {
            file_name: file_name.into(),
            bytes,
        });
        self
    }
}

/// Notifier は宛先チャンネルへ配送
///
/// worker から見て配送は同期的。結果で `mark_completed` か `mark_failed` かが決まる。
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, delivery: Delivery) -> Result<(), NotifyError>;
}
