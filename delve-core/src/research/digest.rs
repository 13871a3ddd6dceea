//! Digestion: search results -> learnings and follow-up questions.

use crate::brain::{LlmProvider, complete_structured};
use crate::error::DigestError;
use crate::types::{ResearchDigest, SearchResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a research analyst. Extract concrete, information-dense \
insights from search results and point out the gaps that are still open.";

/// Distills one query's search results.
#[async_trait]
pub trait Digester: Send + Sync {
    async fn digest(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<ResearchDigest, DigestError>;
}

/// Digester backed by an LLM in JSON mode.
pub struct LlmDigester {
    provider: Arc<dyn LlmProvider>,
    max_learnings: usize,
    max_follow_ups: usize,
    temperature: f32,
}

impl LlmDigester {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        max_learnings: usize,
        max_follow_ups: usize,
        temperature: f32,
    ) -> Self {
        Self {
            provider,
            max_learnings,
            max_follow_ups,
            temperature,
        }
    }

    fn build_prompt(&self, query: &str, results: &[SearchResult]) -> String {
        let contents = results
            .iter()
            .map(|r| format!("<content url=\"{}\">\n{}\n</content>", r.url, r.content))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Analyze the search results for: {query}\n\
             Produce at most {} key learnings and at most {} follow-up questions.\n\
             Respond with a JSON object of the form \
             {{\"learnings\": [\"...\"], \"follow_up_questions\": [\"...\"]}}.\n\n\
             Content:\n{contents}",
            self.max_learnings, self.max_follow_ups
        )
    }
}

fn clean(items: Vec<String>, limit: usize) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(limit)
        .collect()
}

#[async_trait]
impl Digester for LlmDigester {
    async fn digest(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<ResearchDigest, DigestError> {
        if results.is_empty() {
            debug!(query = %query, "No results to digest");
            return Ok(ResearchDigest::default());
        }

        let prompt = self.build_prompt(query, results);
        let raw: ResearchDigest = complete_structured(
            self.provider.as_ref(),
            SYSTEM_PROMPT,
            &prompt,
            self.temperature,
            "ResearchDigest",
        )
        .await?;

        Ok(ResearchDigest {
            learnings: clean(raw.learnings, self.max_learnings),
            follow_up_questions: clean(raw.follow_up_questions, self.max_follow_ups),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::LlmError;
    use pretty_assertions::assert_eq;

    fn results() -> Vec<SearchResult> {
        vec![
            SearchResult::new("Ownership", "https://doc.rust-lang.org/book/ch04-01", "Each value has an owner."),
            SearchResult::new("Borrowing", "https://doc.rust-lang.org/book/ch04-02", "References borrow values."),
        ]
    }

    #[tokio::test]
    async fn test_empty_results_skip_backend() {
        let provider = Arc::new(MockLlmProvider::new());
        let digester = LlmDigester::new(provider.clone(), 2, 2, 0.4);
        let digest = digester.digest("rust", &[]).await.unwrap();
        assert!(digest.is_empty());
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_digest_caps_and_cleans() {
        let provider = Arc::new(MockLlmProvider::with_response(
            r#"{"learnings": ["Each value has exactly one owner", " ", "Borrows never outlive owners", "extra"],
                "follow_up_questions": ["How does Rc change ownership?"]}"#,
            1,
        ));
        let digester = LlmDigester::new(provider.clone(), 2, 2, 0.4);
        let digest = digester.digest("rust ownership", &results()).await.unwrap();

        assert_eq!(
            digest.learnings,
            vec!["Each value has exactly one owner", "Borrows never outlive owners"]
        );
        assert_eq!(digest.follow_up_questions.len(), 1);

        let prompt = &provider.requests()[0].messages[1].content;
        assert!(prompt.contains("Analyze the search results for: rust ownership"));
        assert!(prompt.contains("https://doc.rust-lang.org/book/ch04-02"));
    }

    #[tokio::test]
    async fn test_backend_error_is_digest_error() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::Timeout { timeout_secs: 60 });
        let digester = LlmDigester::new(provider, 2, 2, 0.4);
        let err = digester.digest("rust", &results()).await.unwrap_err();
        assert!(matches!(err.0, LlmError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_malformed_reply_is_schema_mismatch() {
        let provider = Arc::new(MockLlmProvider::with_response(r#"{"learnings": "not a list"}"#, 1));
        let digester = LlmDigester::new(provider, 2, 2, 0.4);
        let err = digester.digest("rust", &results()).await.unwrap_err();
        assert!(matches!(err.0, LlmError::SchemaMismatch { .. }));
    }
}
