//! Web search provider (Serper-compatible API).

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SearchConfig;
use crate::error::CrawlError;

/// Query string + page number → ordered candidate URLs.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// `page` is 1-based. An empty result means there are no more pages.
    async fn search(&self, query: &str, page: u32, page_size: usize) -> Result<Vec<String>, CrawlError>;
}

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    page: u32,
    num: usize,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    #[serde(default)]
    link: Option<String>,
}

impl SerperResponse {
    fn links(self, limit: usize) -> Vec<String> {
        self.organic
            .into_iter()
            .filter_map(|r| r.link)
            .take(limit)
            .collect()
    }
}

/// Serper search client.
pub struct SerperSearch {
    api_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl SerperSearch {
    pub fn new(config: &SearchConfig) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CrawlError::Search(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(&self, query: &str, page: u32, page_size: usize) -> Result<Vec<String>, CrawlError> {
        let request = SerperRequest {
            q: query,
            page,
            num: page_size,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("X-API-KEY", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| CrawlError::Search(format!("Search request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CrawlError::Search(format!("Search API error {status}: {body}")));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| CrawlError::Search(format!("Failed to parse search response: {e}")))?;

        let links = parsed.links(page_size);
        debug!(page, results = links.len(), "Search page fetched");
        Ok(links)
    }
}
