//! LLM provider implementations.
//!
//! Use `create_provider()` to instantiate the appropriate provider based on config.
//! Credentials are read when the provider is built, not when the crate loads.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::ConfigError;
use std::sync::Arc;

pub use openai_compat::OpenAiCompatibleProvider;

/// Build the LLM provider named by `config.provider`.
pub fn create_provider(
    config: &LlmConfig,
    retry: &RetryConfig,
) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    match config.provider.as_str() {
        "openai" | "openai_compat" | "azure" | "ollama" | "vllm" | "lmstudio" => {
            tracing::debug!(provider = %config.provider, model = %config.model, "Creating LLM provider");
            Ok(Arc::new(OpenAiCompatibleProvider::new(
                config,
                retry.clone(),
            )?))
        }
        other => Err(ConfigError::Invalid {
            message: format!("unsupported LLM provider '{other}'"),
        }),
    }
}
