//! Configuration system for Delve.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config directory (`config.toml`) and/or
//! `.delve/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration for a Delve research run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelveConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub research: ResearchConfig,
    pub retry: RetryConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai" or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Temperature for generation.
    pub temperature: f32,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 2048,
            temperature: 0.4,
            timeout_secs: 60,
        }
    }
}

/// Which web search backend executes queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    /// Firecrawl search API with markdown scraping (requires an API key).
    Firecrawl,
    /// DuckDuckGo instant answers (keyless, snippet-only).
    DuckDuckGo,
}

impl std::str::FromStr for SearchBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "firecrawl" => Ok(SearchBackend::Firecrawl),
            "duckduckgo" | "ddg" => Ok(SearchBackend::DuckDuckGo),
            other => Err(ConfigError::Invalid {
                message: format!("unknown search backend '{other}'"),
            }),
        }
    }
}

/// Web search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub backend: SearchBackend,
    /// Environment variable name containing the search API key.
    pub api_key_env: String,
    /// Optional base URL override (self-hosted Firecrawl).
    pub base_url: Option<String>,
    /// Results requested per query.
    pub max_results: usize,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Page content longer than this is truncated before digestion.
    pub max_content_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::Firecrawl,
            api_key_env: "FIRECRAWL_API_KEY".to_string(),
            base_url: None,
            max_results: 2,
            timeout_secs: 30,
            max_content_chars: 25_000,
        }
    }
}

/// Defaults for the research tree shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub breadth: usize,
    pub depth: usize,
    /// Cap on simultaneous search + digest pairs across the whole tree.
    pub concurrency: usize,
    pub max_learnings_per_query: usize,
    pub max_follow_ups_per_query: usize,
    /// Where the CLI writes JSON reports. Defaults to the user data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_dir: Option<PathBuf>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            breadth: 3,
            depth: 2,
            concurrency: 2,
            max_learnings_per_query: 2,
            max_follow_ups_per_query: 2,
            reports_dir: None,
        }
    }
}

impl ResearchConfig {
    /// Resolve the reports directory, falling back to `<data_dir>/reports`.
    pub fn resolved_reports_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.reports_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "delve", "delve")
            .map(|d| d.data_dir().join("reports"))
            .unwrap_or_else(|| PathBuf::from("reports"))
    }
}

/// Retry policy for transient backend failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl DelveConfig {
    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("research.breadth", self.research.breadth),
            ("research.depth", self.research.depth),
            ("research.concurrency", self.research.concurrency),
            ("search.max_results", self.search.max_results),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    message: format!("{field} must be greater than 0"),
                });
            }
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                message: "retry.backoff_multiplier must be at least 1.0".to_string(),
            });
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

/// Fallback for `search.base_url` when no layer sets it (self-hosted Firecrawl).
pub const SEARCH_BASE_URL_ENV: &str = "FIRECRAWL_BASE_URL";

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DELVE_`)
/// 3. Workspace-local config (`.delve/config.toml`)
/// 4. User config (`~/.config/delve/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DelveConfig>,
) -> Result<DelveConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(DelveConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "delve", "delve") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".delve").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DELVE_LLM__MODEL, DELVE_RESEARCH__BREADTH, etc.
    figment = figment.merge(Env::prefixed("DELVE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let mut config: DelveConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    if config.search.base_url.is_none() {
        config.search.base_url = std::env::var(SEARCH_BASE_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty());
    }
    config.validate()?;
    Ok(config)
}

/// Read a credential from the process environment at call time.
pub fn require_env(var: &str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::EnvVarMissing {
            var: var.to_string(),
        }),
    }
}
