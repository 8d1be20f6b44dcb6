use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::SearchError;
use crate::types::SearchResult;

/// Runs a web query and returns organic results, best first.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError>;
}

#[async_trait]
impl<T: WebSearch + ?Sized> WebSearch for Arc<T> {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        (**self).search(query).await
    }
}

/// Which search API to call.
#[derive(Debug, Clone)]
pub enum SearchBackend {
    /// A SearXNG instance with the JSON output format enabled.
    Searxng { base_url: String },
    /// Brave Search API.
    Brave { base_url: String, api_key: String },
}

/// HTTP web search over SearXNG or Brave.
pub struct HttpSearch {
    client: reqwest::Client,
    backend: SearchBackend,
    max_results: usize,
}

impl HttpSearch {
    pub fn new(backend: SearchBackend) -> Self {
        Self {
            client: reqwest::Client::new(),
            backend,
            max_results: 10,
        }
    }

    pub fn searxng(base_url: impl Into<String>) -> Self {
        Self::new(SearchBackend::Searxng {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn brave(api_key: impl Into<String>) -> Self {
        Self::new(SearchBackend::Brave {
            base_url: "https://api.search.brave.com".into(),
            api_key: api_key.into(),
        })
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    async fn get_json(&self, req: reqwest::RequestBuilder) -> Result<Value, SearchError> {
        let resp = req
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(SearchError::ApiError { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| SearchError::Parse(e.to_string()))
    }
}

/// Parse SearXNG JSON results.
fn parse_searxng_results(body: &Value, max: usize) -> Vec<SearchResult> {
    let empty = vec![];
    let results = body["results"].as_array().unwrap_or(&empty);
    results
        .iter()
        .filter_map(|r| {
            Some(SearchResult {
                title: r["title"].as_str()?.to_string(),
                url: r["url"].as_str()?.to_string(),
                description: r["content"].as_str().unwrap_or("").to_string(),
            })
        })
        .take(max)
        .collect()
}

/// Parse Brave Search API results.
fn parse_brave_results(body: &Value, max: usize) -> Vec<SearchResult> {
    let empty = vec![];
    let results = body["web"]["results"].as_array().unwrap_or(&empty);
    results
        .iter()
        .filter_map(|r| {
            Some(SearchResult {
                title: r["title"].as_str()?.to_string(),
                url: r["url"].as_str()?.to_string(),
                description: r["description"].as_str().unwrap_or("").to_string(),
            })
        })
        .take(max)
        .collect()
}

#[async_trait]
impl WebSearch for HttpSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let results = match &self.backend {
            SearchBackend::Searxng { base_url } => {
                let req = self
                    .client
                    .get(format!("{base_url}/search"))
                    .query(&[("q", query), ("format", "json")]);
                parse_searxng_results(&self.get_json(req).await?, self.max_results)
            }
            SearchBackend::Brave { base_url, api_key } => {
                let count = self.max_results.to_string();
                let req = self
                    .client
                    .get(format!("{base_url}/res/v1/web/search"))
                    .header("Accept", "application/json")
                    .header("X-Subscription-Token", api_key)
                    .query(&[("q", query), ("count", count.as_str())]);
                parse_brave_results(&self.get_json(req).await?, self.max_results)
            }
        };

        debug!(%query, results = results.len(), "web search");
        Ok(results)
    }
}
