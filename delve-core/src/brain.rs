//! LLM provider abstraction and structured output.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions, and the
//! `complete_structured` helper that turns a JSON reply into a typed value or a
//! `LlmError::SchemaMismatch`. Callers never see a half-parsed response.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full (non-streaming) completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Run a JSON-mode completion and deserialize the reply into `T`.
///
/// `expected` names the schema in error messages.
pub async fn complete_structured<T: DeserializeOwned>(
    provider: &dyn LlmProvider,
    system: &str,
    prompt: &str,
    temperature: f32,
    expected: &str,
) -> Result<T, LlmError> {
    let request = CompletionRequest {
        messages: vec![Message::system(system), Message::user(prompt)],
        temperature,
        json_mode: true,
        ..Default::default()
    };
    let response = provider.complete(request).await?;
    debug!(
        model = %response.model,
        input_tokens = response.usage.input_tokens,
        output_tokens = response.usage.output_tokens,
        total_tokens = response.usage.total(),
        schema = expected,
        "Structured completion received"
    );
    parse_structured(&response.message.content, expected)
}

/// Parse an LLM reply that should contain a single JSON object.
///
/// Tolerates markdown code fences and leading/trailing prose around the object.
pub fn parse_structured<T: DeserializeOwned>(text: &str, expected: &str) -> Result<T, LlmError> {
    let body = extract_json_object(text).ok_or_else(|| LlmError::SchemaMismatch {
        expected: expected.to_string(),
        message: "no JSON object in response".to_string(),
    })?;
    serde_json::from_str(body).map_err(|e| LlmError::SchemaMismatch {
        expected: expected.to_string(),
        message: e.to_string(),
    })
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// A mock LLM provider for testing.
///
/// Returns queued responses in FIFO order; once the queue is drained every call
/// fails with `LlmError::Connection`.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that answers with the given text `count` times.
    pub fn with_response(text: &str, count: usize) -> Self {
        let provider = Self::new();
        for _ in 0..count {
            provider.queue_response(Self::text_response(text));
        }
        provider
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.lock_responses().push_back(Ok(response));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.lock_responses().push_back(Err(error));
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<CompletionResponse, LlmError>>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request);
        }
        self.lock_responses()
            .pop_front()
            .unwrap_or_else(|| {
                Err(LlmError::Connection {
                    message: "mock provider has no queued responses".to_string(),
                })
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
