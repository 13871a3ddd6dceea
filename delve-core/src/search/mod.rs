//! Web search executors.
//!
//! A `SearchExecutor` turns one query into a bounded list of `SearchResult`s.
//! Executors own their timeouts and retries; an empty result list is a
//! successful outcome, not an error.

pub mod duckduckgo;
pub mod firecrawl;

use crate::config::{RetryConfig, SearchBackend, SearchConfig};
use crate::error::{ConfigError, SearchError};
use crate::types::SearchResult;
use async_trait::async_trait;
use std::sync::Arc;

pub use duckduckgo::DuckDuckGoSearch;
pub use firecrawl::FirecrawlSearch;

/// Executes a single web search.
#[async_trait]
pub trait SearchExecutor: Send + Sync {
    async fn search(&self, query: &str, max_results: usize)
    -> Result<Vec<SearchResult>, SearchError>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// Build the executor selected by `config.backend`.
pub fn create_executor(
    config: &SearchConfig,
    retry: &RetryConfig,
) -> Result<Arc<dyn SearchExecutor>, ConfigError> {
    tracing::debug!(backend = ?config.backend, "Creating search executor");
    match config.backend {
        SearchBackend::Firecrawl => Ok(Arc::new(FirecrawlSearch::new(config, retry.clone())?)),
        SearchBackend::DuckDuckGo => Ok(Arc::new(DuckDuckGoSearch::new(config, retry.clone())?)),
    }
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Map a transport-level reqwest failure onto `SearchError`.
pub(crate) fn map_transport_error(err: reqwest::Error, timeout_secs: u64) -> SearchError {
    if err.is_timeout() {
        SearchError::Timeout { timeout_secs }
    } else {
        SearchError::Request {
            message: err.to_string(),
        }
    }
}
