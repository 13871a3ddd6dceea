//! Firecrawl search backend.
//!
//! Calls `POST /v1/search` with markdown scraping enabled, so every result carries
//! the page body rather than a short snippet. Results missing a URL or content are
//! dropped.

use super::{SearchExecutor, map_transport_error, truncate_chars};
use crate::config::{RetryConfig, SearchConfig};
use crate::error::{ConfigError, SearchError};
use crate::retry::with_retry;
use crate::types::SearchResult;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";

#[derive(Debug, Deserialize)]
struct FirecrawlResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Vec<FirecrawlItem>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FirecrawlItem {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
}

/// Search executor backed by the Firecrawl API.
pub struct FirecrawlSearch {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    max_content_chars: usize,
    retry: RetryConfig,
}

impl FirecrawlSearch {
    /// Build from config, reading the API key from `config.api_key_env` now.
    pub fn new(config: &SearchConfig, retry: RetryConfig) -> Result<Self, ConfigError> {
        let api_key = crate::config::require_env(&config.api_key_env)?;
        Self::new_with_key(config, api_key, retry)
    }

    pub fn new_with_key(
        config: &SearchConfig,
        api_key: String,
        retry: RetryConfig,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("Delve/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
            max_content_chars: config.max_content_chars,
            retry,
        })
    }

    /// Convert a decoded response into results, keeping at most `max_results`.
    fn collect_results(
        &self,
        response: FirecrawlResponse,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        if !response.success && response.data.is_empty() {
            if let Some(error) = response.error {
                return Err(SearchError::ResponseParse { message: error });
            }
        }

        Ok(response
            .data
            .into_iter()
            .filter_map(|item| {
                let url = item.url.filter(|u| !u.is_empty())?;
                let content = item
                    .markdown
                    .or(item.description)
                    .filter(|c| !c.trim().is_empty())?;
                Some(SearchResult {
                    title: item.title.unwrap_or_else(|| url.clone()),
                    url,
                    content: truncate_chars(&content, self.max_content_chars),
                })
            })
            .take(max_results)
            .collect())
    }

    async fn search_once(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let url = format!("{}/v1/search", self.base_url);
        let body = json!({
            "query": query,
            "limit": max_results,
            "scrapeOptions": { "formats": ["markdown"] },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            return Err(SearchError::RateLimited { retry_after_secs });
        }

        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        if !status.is_success() {
            return Err(SearchError::Backend {
                status: status.as_u16(),
                message: truncate_chars(&text, 500),
            });
        }

        let decoded: FirecrawlResponse =
            serde_json::from_str(&text).map_err(|e| SearchError::ResponseParse {
                message: e.to_string(),
            })?;
        self.collect_results(decoded, max_results)
    }
}

#[async_trait]
impl SearchExecutor for FirecrawlSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        debug!(query = %query, max_results, "Firecrawl search");
        with_retry(&self.retry, || self.search_once(query, max_results)).await
    }

    fn name(&self) -> &str {
        "firecrawl"
    }
}
