//! Error types for the Delve research core.
//!
//! Uses `thiserror` for public API error types. Backend failures are split by the
//! collaborator that produced them (generation, search, digest) so the engine can
//! absorb them per branch, while configuration and argument errors propagate.

/// Top-level error type for the Delve core library.
#[derive(Debug, thiserror::Error)]
pub enum DelveError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Query generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Digest error: {0}")]
    Digest(#[from] DigestError),

    #[error("Invalid argument '{name}': {value} (must be at least 1)")]
    InvalidArgument { name: String, value: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Response did not match {expected} schema: {message}")]
    SchemaMismatch { expected: String, message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

impl LlmError {
    /// Whether the failure is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
        )
    }
}

/// Errors from the web search backend.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {message}")]
    Request { message: String },

    #[error("Search backend rate limited the request, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Search timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Search backend returned HTTP {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Failed to parse search response: {message}")]
    ResponseParse { message: String },
}

impl SearchError {
    /// Whether the failure is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::RateLimited { .. }
            | SearchError::Timeout { .. }
            | SearchError::Request { .. } => true,
            SearchError::Backend { status, .. } => *status >= 500,
            SearchError::ResponseParse { .. } => false,
        }
    }
}

/// Failure to turn a topic into search queries.
#[derive(Debug, thiserror::Error)]
#[error("failed to generate queries: {0}")]
pub struct GenerationError(#[from] pub LlmError);

/// Failure to distill search results into learnings.
#[derive(Debug, thiserror::Error)]
#[error("failed to digest results: {0}")]
pub struct DigestError(#[from] pub LlmError);

/// A type alias for results using the top-level `DelveError`.
pub type Result<T> = std::result::Result<T, DelveError>;
