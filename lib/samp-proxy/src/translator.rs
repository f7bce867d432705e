//! Fetching of resources referenced through translator paths

use async_trait::async_trait;
use reqwest::Url;
use samp_core::{CoreError, Result};
use std::time::Duration;
use tracing::debug;

/// Retrieves the bytes a translator reference points to
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>>;
}

/// Fetches `http`, `https` and `file` URLs
#[derive(Clone)]
pub struct UrlFetcher {
    client: reqwest::Client,
}

impl UrlFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ResourceFetcher for UrlFetcher {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let url = Url::parse(reference)
            .map_err(|e| CoreError::NotFound(format!("invalid reference {}: {}", reference, e)))?;

        match url.scheme() {
            "http" | "https" => {
                debug!("Translating {}", url);
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| CoreError::NotFound(format!("{}: {}", reference, e)))?;
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| CoreError::NotFound(format!("{}: {}", reference, e)))?;
                Ok(body.to_vec())
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| CoreError::NotFound(format!("invalid file reference {}", reference)))?;
                debug!("Translating local file {}", path.display());
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| CoreError::NotFound(format!("{}: {}", path.display(), e)))
            }
            other => Err(CoreError::NotFound(format!("unsupported reference scheme {}", other))),
        }
    }
}
