use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::FetchError;

/// Retrieves a readable-text rendition of a URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

#[async_trait]
impl<T: ContentFetcher + ?Sized> ContentFetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        (**self).fetch(url).await
    }
}

/// Jina Reader client (`https://r.jina.ai/<url>`). Returns markdown with
/// links, images and page chrome stripped.
pub struct JinaReader {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl JinaReader {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://r.jina.ai".into(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ContentFetcher for JinaReader {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        debug!(%url, "reading page");

        let resp = self
            .client
            .get(format!("{}/{}", self.base_url, url))
            .bearer_auth(&self.api_key)
            .header("X-Md-Link-Style", "discarded")
            .header("X-Remove-Selector", "header, footer, nav")
            .header("X-Retain-Images", "none")
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        resp.text()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))
    }
}
