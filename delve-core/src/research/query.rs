//! Query generation: topic + prior learnings -> a batch of search queries.

use crate::brain::{LlmProvider, complete_structured};
use crate::error::GenerationError;
use crate::types::SearchQuery;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a research assistant that writes focused web search queries. \
Take the previous findings into account and make every query distinct, so each one uncovers \
information the others will not.";

/// Produces search queries for a topic.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    /// Return at most `count` queries. Fewer is acceptable.
    async fn generate_queries(
        &self,
        topic: &str,
        count: usize,
        prior_learnings: &[String],
    ) -> Result<Vec<SearchQuery>, GenerationError>;
}

#[derive(Debug, Deserialize)]
struct QueryBatch {
    #[serde(default)]
    queries: Vec<SearchQuery>,
}

/// Query generator backed by an LLM in JSON mode.
pub struct LlmQueryGenerator {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
}

impl LlmQueryGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, temperature: f32) -> Self {
        Self {
            provider,
            temperature,
        }
    }

    fn build_prompt(topic: &str, count: usize, prior_learnings: &[String]) -> String {
        let findings = if prior_learnings.is_empty() {
            "No previous findings".to_string()
        } else {
            prior_learnings
                .iter()
                .map(|l| format!("- {l}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "Topic: {topic}\n\n\
             Previous findings:\n{findings}\n\n\
             Generate up to {count} focused search queries that deepen understanding of the topic. \
             Each query needs a clear research goal.\n\
             Respond with a JSON object of the form \
             {{\"queries\": [{{\"query\": \"...\", \"research_goal\": \"...\"}}]}}."
        )
    }
}

/// Drop blank and repeated queries, then keep at most `count`.
pub(crate) fn normalize_queries(queries: Vec<SearchQuery>, count: usize) -> Vec<SearchQuery> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .map(|q| SearchQuery::new(q.query.trim(), q.reasoning.trim()))
        .filter(|q| !q.query.is_empty())
        .filter(|q| seen.insert(q.query.to_lowercase()))
        .take(count)
        .collect()
}

#[async_trait]
impl QueryGenerator for LlmQueryGenerator {
    async fn generate_queries(
        &self,
        topic: &str,
        count: usize,
        prior_learnings: &[String],
    ) -> Result<Vec<SearchQuery>, GenerationError> {
        let prompt = Self::build_prompt(topic, count, prior_learnings);
        let batch: QueryBatch = complete_structured(
            self.provider.as_ref(),
            SYSTEM_PROMPT,
            &prompt,
            self.temperature,
            "QueryBatch",
        )
        .await?;

        let queries = normalize_queries(batch.queries, count);
        debug!(requested = count, produced = queries.len(), "Generated search queries");
        Ok(queries)
    }
}
