//! DuckDuckGo instant answers backend.
//!
//! Keyless and privacy-first. Results are the abstract plus related topics, so the
//! content is a snippet rather than a full page.

use super::{SearchExecutor, map_transport_error, truncate_chars};
use crate::config::{RetryConfig, SearchConfig};
use crate::error::{ConfigError, SearchError};
use crate::retry::with_retry;
use crate::types::SearchResult;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.duckduckgo.com";

/// Search executor backed by the DuckDuckGo instant answer API.
pub struct DuckDuckGoSearch {
    client: Client,
    base_url: String,
    timeout_secs: u64,
    max_content_chars: usize,
    retry: RetryConfig,
}

impl DuckDuckGoSearch {
    pub fn new(config: &SearchConfig, retry: RetryConfig) -> Result<Self, ConfigError> {
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
            timeout_secs: config.timeout_secs,
            max_content_chars: config.max_content_chars,
            retry,
        })
    }

    /// Extract results from an instant-answer payload.
    fn parse_results(&self, body: &Value, max_results: usize) -> Vec<SearchResult> {
        let mut results = Vec::new();

        // Abstract (main answer)
        if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str())
            && !abstract_text.is_empty()
        {
            let url = body
                .get("AbstractURL")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !url.is_empty() {
                let title = body
                    .get("Heading")
                    .and_then(|v| v.as_str())
                    .filter(|h| !h.is_empty())
                    .or_else(|| body.get("AbstractSource").and_then(|v| v.as_str()))
                    .unwrap_or(url);
                results.push(SearchResult {
                    title: title.to_string(),
                    url: url.to_string(),
                    content: truncate_chars(abstract_text, self.max_content_chars),
                });
            }
        }

        for key in ["Results", "RelatedTopics"] {
            if let Some(items) = body.get(key).and_then(|v| v.as_array()) {
                for item in items {
                    if results.len() >= max_results {
                        return results;
                    }
                    if let Some(result) = self.topic_to_result(item) {
                        results.push(result);
                    }
                }
            }
        }

        results.truncate(max_results);
        results
    }

    fn topic_to_result(&self, topic: &Value) -> Option<SearchResult> {
        let text = topic.get("Text")?.as_str()?;
        let url = topic.get("FirstURL")?.as_str()?;
        if text.is_empty() || url.is_empty() {
            return None;
        }
        let title = text.split(" - ").next().unwrap_or(text);
        Some(SearchResult {
            title: title.to_string(),
            url: url.to_string(),
            content: truncate_chars(text, self.max_content_chars),
        })
    }

    async fn search_once(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let url = format!(
            "{}/?q={}&format=json&no_html=1&skip_disambig=1",
            self.base_url,
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Backend {
                status: status.as_u16(),
                message: format!("DuckDuckGo returned {status}"),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchError::ResponseParse {
                message: e.to_string(),
            })?;

        Ok(self.parse_results(&body, max_results))
    }
}

#[async_trait]
impl SearchExecutor for DuckDuckGoSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        debug!(query = %query, max_results, "DuckDuckGo search");
        with_retry(&self.retry, || self.search_once(query, max_results)).await
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}
