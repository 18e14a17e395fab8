//! PayloadFetcher port - ジョブの payload を取得

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::FetchError;

/// Fetch the raw payload behind a source locator.
///
/// A failure is terminal for the current attempt; the worker routes it
/// through retry accounting instead of retrying inline.
#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<Bytes, FetchError>;
}
