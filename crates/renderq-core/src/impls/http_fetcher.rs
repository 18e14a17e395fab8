//! HttpFetcher - downloads payloads over HTTP(S) or reads them from disk

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::domain::FetchError;
use crate::ports::PayloadFetcher;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// [`PayloadFetcher`] for `http(s)://` URLs, `file://` URLs and bare paths.
///
/// Non-2xx responses are errors; the body is not inspected.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    pub fn user_agent() -> &'static str {
        concat!("renderq/", env!("CARGO_PKG_VERSION"))
    }

    async fn get(&self, url: Url) -> Result<Bytes, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let resp = self.client.get(url.clone()).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.bytes().await.map_err(transport)
    }
}

async fn read_file(path: &Path) -> Result<Bytes, FetchError> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|source| FetchError::Read {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl PayloadFetcher for HttpFetcher {
    async fn fetch(&self, source: &str) -> Result<Bytes, FetchError> {
        let Ok(url) = Url::parse(source) else {
            debug!(source, "reading payload from local path");
            return read_file(&PathBuf::from(source)).await;
        };

        match url.scheme() {
            "http" | "https" => self.get(url).await,
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| FetchError::Unsupported(source.to_string()))?;
                read_file(&path).await
            }
            _ => Err(FetchError::Unsupported(source.to_string())),
        }
    }
}
