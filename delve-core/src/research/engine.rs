//! Recursive research engine.
//!
//! One call to [`ResearchEngine::run`] expands a tree of queries: every level asks
//! the generator for up to `breadth` queries, runs search + digest for each one as
//! its own task, merges the findings into a shared [`ResearchState`], and recurses
//! with a narrower breadth until depth runs out.
//!
//! A single semaphore per run bounds how many search + digest pairs are in flight
//! across the whole tree. The permit is released before a branch recurses, so a
//! parent waiting on its children never holds one.

use super::digest::{Digester, LlmDigester};
use super::policy::{BreadthPolicy, FollowUpTopicComposer, HalvingBreadth, TopicComposer};
use super::query::{LlmQueryGenerator, QueryGenerator};
use super::state::{ResearchProgress, ResearchState, ResearchStats, StatsCounter};
use crate::config::{DelveConfig, load_config};
use crate::error::{ConfigError, DelveError, Result};
use crate::providers::create_provider;
use crate::search::{SearchExecutor, create_executor};
use crate::types::{ResearchDigest, SearchQuery};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Which collaborator a failed branch died in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchStage {
    Generation,
    Search,
    Digest,
}

impl std::fmt::Display for BranchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchStage::Generation => write!(f, "generation"),
            BranchStage::Search => write!(f, "search"),
            BranchStage::Digest => write!(f, "digest"),
        }
    }
}

/// Observer for progress updates during a run.
///
/// Called from branch tasks, so implementations must be cheap and non-blocking.
pub trait ResearchCallback: Send + Sync {
    fn on_progress(&self, progress: &ResearchProgress);
    /// A branch (or a whole sub-tree, for `Generation`) was abandoned.
    fn on_branch_failed(&self, stage: BranchStage, subject: &str, error: &dyn std::error::Error);
}

/// Callback that ignores every event.
pub struct NoOpCallback;

impl ResearchCallback for NoOpCallback {
    fn on_progress(&self, _progress: &ResearchProgress) {}
    fn on_branch_failed(&self, _stage: BranchStage, _subject: &str, _error: &dyn std::error::Error) {}
}

/// Result of one research run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchOutcome {
    /// Distinct learnings in first-insertion order.
    pub learnings: Vec<String>,
    /// Distinct URLs of every search result seen, in first-insertion order.
    pub visited_urls: Vec<String>,
    pub stats: ResearchStats,
    pub progress: ResearchProgress,
}

/// Drives the generator, executor and digester across the research tree.
pub struct ResearchEngine {
    generator: Arc<dyn QueryGenerator>,
    executor: Arc<dyn SearchExecutor>,
    digester: Arc<dyn Digester>,
    breadth_policy: Arc<dyn BreadthPolicy>,
    topic_composer: Arc<dyn TopicComposer>,
    callback: Arc<dyn ResearchCallback>,
    max_results: usize,
}

impl ResearchEngine {
    pub fn new(
        generator: Arc<dyn QueryGenerator>,
        executor: Arc<dyn SearchExecutor>,
        digester: Arc<dyn Digester>,
    ) -> Self {
        Self {
            generator,
            executor,
            digester,
            breadth_policy: Arc::new(HalvingBreadth),
            topic_composer: Arc::new(FollowUpTopicComposer),
            callback: Arc::new(NoOpCallback),
            max_results: crate::config::SearchConfig::default().max_results,
        }
    }

    /// Build the LLM-backed engine described by `config`.
    ///
    /// Credentials are read here, so a missing key surfaces as
    /// `ConfigError::EnvVarMissing` naming the variable.
    pub fn from_config(config: &DelveConfig) -> std::result::Result<Self, ConfigError> {
        let provider = create_provider(&config.llm, &config.retry)?;
        debug!(
            provider = %config.llm.provider,
            model = provider.model_name(),
            "LLM provider ready"
        );
        let executor = create_executor(&config.search, &config.retry)?;
        let generator = Arc::new(LlmQueryGenerator::new(
            Arc::clone(&provider),
            config.llm.temperature,
        ));
        let digester = Arc::new(LlmDigester::new(
            provider,
            config.research.max_learnings_per_query,
            config.research.max_follow_ups_per_query,
            config.llm.temperature,
        ));
        Ok(Self::new(generator, executor, digester).with_max_results(config.search.max_results))
    }

    pub fn with_breadth_policy(mut self, policy: Arc<dyn BreadthPolicy>) -> Self {
        self.breadth_policy = policy;
        self
    }

    pub fn with_topic_composer(mut self, composer: Arc<dyn TopicComposer>) -> Self {
        self.topic_composer = composer;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Results requested from the executor per query.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    /// Research `topic` to the given breadth and depth with at most `concurrency`
    /// search + digest pairs in flight.
    ///
    /// Branch failures are logged and skipped; only invalid arguments are errors.
    pub async fn run(
        &self,
        topic: &str,
        breadth: usize,
        depth: usize,
        concurrency: usize,
    ) -> Result<ResearchOutcome> {
        ensure_positive("breadth", breadth)?;
        ensure_positive("depth", depth)?;
        ensure_positive("concurrency", concurrency)?;

        info!(topic = %topic, breadth, depth, concurrency, "Starting research");

        let ctx = Arc::new(RunContext {
            generator: Arc::clone(&self.generator),
            executor: Arc::clone(&self.executor),
            digester: Arc::clone(&self.digester),
            breadth_policy: Arc::clone(&self.breadth_policy),
            topic_composer: Arc::clone(&self.topic_composer),
            callback: Arc::clone(&self.callback),
            semaphore: Semaphore::new(concurrency),
            state: ResearchState::new(),
            progress: Mutex::new(ResearchProgress::new(breadth, depth)),
            stats: StatsCounter::default(),
            root_topic: topic.to_string(),
            total_depth: depth,
            max_results: self.max_results,
        });

        explore(Arc::clone(&ctx), topic.to_string(), breadth, depth).await;

        let outcome = ResearchOutcome {
            learnings: ctx.state.learnings(),
            visited_urls: ctx.state.visited_urls(),
            stats: ctx.stats.snapshot(),
            progress: ctx.progress_snapshot(),
        };
        info!(
            learnings = outcome.learnings.len(),
            urls = outcome.visited_urls.len(),
            failed_branches = outcome.stats.failed_branches,
            "Research complete"
        );
        Ok(outcome)
    }
}

fn ensure_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(DelveError::InvalidArgument {
            name: name.to_string(),
            value: 0,
        });
    }
    Ok(())
}

/// Everything one run's branches share. Per-branch parameters travel by value.
struct RunContext {
    generator: Arc<dyn QueryGenerator>,
    executor: Arc<dyn SearchExecutor>,
    digester: Arc<dyn Digester>,
    breadth_policy: Arc<dyn BreadthPolicy>,
    topic_composer: Arc<dyn TopicComposer>,
    callback: Arc<dyn ResearchCallback>,
    semaphore: Semaphore,
    state: ResearchState,
    progress: Mutex<ResearchProgress>,
    stats: StatsCounter,
    root_topic: String,
    total_depth: usize,
    max_results: usize,
}

impl RunContext {
    fn update_progress(&self, update: impl FnOnce(&mut ResearchProgress)) {
        // Notify under the lock so observers see snapshots in update order.
        let mut progress = self
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut progress);
        self.callback.on_progress(&progress);
    }

    fn progress_snapshot(&self) -> ResearchProgress {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Search and digest one query while holding a concurrency permit.
    ///
    /// Returns the result URLs and the digest, or `None` if the branch failed.
    async fn search_and_digest(&self, query: &SearchQuery) -> Option<(Vec<String>, ResearchDigest)> {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!(error = %e, "Concurrency limiter closed; skipping branch");
                return None;
            }
        };

        self.stats.search_call();
        let results = match self.executor.search(&query.query, self.max_results).await {
            Ok(results) => results,
            Err(e) => {
                warn!(
                    query = %query.query,
                    backend = self.executor.name(),
                    error = %e,
                    "Search failed; skipping branch"
                );
                self.stats.failed_branch();
                self.callback
                    .on_branch_failed(BranchStage::Search, &query.query, &e);
                return None;
            }
        };

        self.stats.digest_call();
        let digest = match self.digester.digest(&query.query, &results).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!(query = %query.query, error = %e, "Digest failed; skipping branch");
                self.stats.failed_branch();
                self.callback
                    .on_branch_failed(BranchStage::Digest, &query.query, &e);
                return None;
            }
        };

        let urls = results.into_iter().map(|r| r.url).collect();
        Some((urls, digest))
    }
}

/// Expand one level of the tree and wait for all of its branches.
fn explore(ctx: Arc<RunContext>, topic: String, breadth: usize, depth: usize) -> BoxFuture<'static, ()> {
    async move {
        if depth == 0 {
            return;
        }
        let level = ctx.total_depth.saturating_sub(depth) + 1;

        let prior = ctx.state.learnings();
        ctx.stats.generator_call();
        let queries = match ctx.generator.generate_queries(&topic, breadth, &prior).await {
            Ok(queries) => queries,
            Err(e) => {
                warn!(level, error = %e, "Query generation failed; abandoning sub-tree");
                ctx.stats.failed_generation();
                ctx.callback
                    .on_branch_failed(BranchStage::Generation, &topic, &e);
                return;
            }
        };
        let queries: Vec<SearchQuery> = queries.into_iter().take(breadth).collect();

        info!(level, breadth, queries = queries.len(), "Research level started");
        ctx.update_progress(|p| p.level_started(level, breadth, queries.len()));

        let mut handles = Vec::with_capacity(queries.len());
        for query in queries {
            handles.push(tokio::spawn(run_branch(Arc::clone(&ctx), query, breadth, depth)));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(level, error = %e, "Research branch task aborted");
                ctx.stats.failed_branch();
            }
        }
    }
    .boxed()
}

/// One branch: search + digest, merge, then recurse with a narrower breadth.
async fn run_branch(ctx: Arc<RunContext>, query: SearchQuery, breadth: usize, depth: usize) {
    let outcome = ctx.search_and_digest(&query).await;
    ctx.update_progress(|p| p.query_finished());

    let Some((urls, digest)) = outcome else {
        return;
    };

    let merged = ctx.state.merge(digest.learnings.iter().cloned(), urls);
    debug!(
        query = %query.query,
        new_learnings = merged.new_learnings,
        new_urls = merged.new_urls,
        "Merged branch findings"
    );

    let next_depth = depth - 1;
    if next_depth == 0 {
        return;
    }
    let next_breadth = ctx.breadth_policy.next_breadth(breadth).max(1);
    let next_topic = ctx.topic_composer.compose(&ctx.root_topic, &query, &digest);
    explore(ctx, next_topic, next_breadth, next_depth).await;
}

/// Research `topic` with the configured LLM and search backends.
///
/// Configuration is layered from files and `DELVE_` variables; `model` overrides
/// the configured model when non-empty. Fails with `ConfigError::EnvVarMissing` if
/// a credential variable is unset.
pub async fn deep_research(
    topic: &str,
    breadth: usize,
    depth: usize,
    concurrency: usize,
    model: &str,
) -> Result<ResearchOutcome> {
    let mut config = load_config(None, None)?;
    if !model.trim().is_empty() {
        config.llm.model = model.trim().to_string();
    }
    deep_research_with_config(topic, breadth, depth, concurrency, &config).await
}

/// Like [`deep_research`], with an explicit configuration.
pub async fn deep_research_with_config(
    topic: &str,
    breadth: usize,
    depth: usize,
    concurrency: usize,
    config: &DelveConfig,
) -> Result<ResearchOutcome> {
    // Before credentials are read, so bad arguments win over a missing key.
    ensure_positive("breadth", breadth)?;
    ensure_positive("depth", depth)?;
    ensure_positive("concurrency", concurrency)?;

    let engine = ResearchEngine::from_config(config)?;
    engine.run(topic, breadth, depth, concurrency).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DigestError, GenerationError, LlmError, SearchError};
    use crate::types::SearchResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingGenerator {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl QueryGenerator for CountingGenerator {
        async fn generate_queries(
            &self,
            topic: &str,
            count: usize,
            _prior: &[String],
        ) -> std::result::Result<Vec<SearchQuery>, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LlmError::Connection {
                    message: "down".into(),
                }
                .into());
            }
            // Deliberately over-produce so truncation is exercised.
            Ok((0..count + 2)
                .map(|i| SearchQuery::new(format!("{topic} #{i}"), "goal"))
                .collect())
        }
    }

    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SearchExecutor for CountingExecutor {
        async fn search(
            &self,
            query: &str,
            _max_results: usize,
        ) -> std::result::Result<Vec<SearchResult>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![SearchResult::new(query, format!("https://example.com/{}", query.len()), "body")])
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[derive(Default)]
    struct EchoDigester {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Digester for EchoDigester {
        async fn digest(
            &self,
            query: &str,
            _results: &[SearchResult],
        ) -> std::result::Result<ResearchDigest, DigestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResearchDigest {
                learnings: vec![format!("learned about {query}")],
                follow_up_questions: vec![],
            })
        }
    }

    struct Fixture {
        generator: Arc<CountingGenerator>,
        executor: Arc<CountingExecutor>,
        digester: Arc<EchoDigester>,
    }

    impl Fixture {
        fn new(fail_generation: bool) -> Self {
            Self {
                generator: Arc::new(CountingGenerator {
                    fail: fail_generation,
                    ..Default::default()
                }),
                executor: Arc::new(CountingExecutor::default()),
                digester: Arc::new(EchoDigester::default()),
            }
        }

        fn engine(&self) -> ResearchEngine {
            ResearchEngine::new(
                self.generator.clone(),
                self.executor.clone(),
                self.digester.clone(),
            )
        }

        fn context(&self, depth: usize) -> Arc<RunContext> {
            Arc::new(RunContext {
                generator: self.generator.clone(),
                executor: self.executor.clone(),
                digester: self.digester.clone(),
                breadth_policy: Arc::new(HalvingBreadth),
                topic_composer: Arc::new(FollowUpTopicComposer),
                callback: Arc::new(NoOpCallback),
                semaphore: Semaphore::new(2),
                state: ResearchState::new(),
                progress: Mutex::new(ResearchProgress::new(3, depth)),
                stats: StatsCounter::default(),
                root_topic: "root".into(),
                total_depth: depth,
                max_results: 2,
            })
        }
    }

    #[tokio::test]
    async fn test_depth_zero_calls_nothing() {
        let fixture = Fixture::new(false);
        let ctx = fixture.context(0);
        explore(Arc::clone(&ctx), "root".into(), 3, 0).await;

        assert!(ctx.state.learnings().is_empty());
        assert!(ctx.state.visited_urls().is_empty());
        assert_eq!(fixture.generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.digester.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_arguments() {
        let engine = Fixture::new(false).engine();
        for (breadth, depth, concurrency, name) in
            [(0, 1, 1, "breadth"), (1, 0, 1, "depth"), (1, 1, 0, "concurrency")]
        {
            let err = engine.run("t", breadth, depth, concurrency).await.unwrap_err();
            match err {
                DelveError::InvalidArgument { name: got, value } => {
                    assert_eq!(got, name);
                    assert_eq!(value, 0);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_generator_output_truncated_to_breadth() {
        let fixture = Fixture::new(false);
        let outcome = fixture.engine().run("rust", 3, 1, 2).await.unwrap();

        assert_eq!(fixture.executor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.learnings.len(), 3);
        assert_eq!(outcome.stats.search_calls, 3);
        assert_eq!(outcome.stats.generator_calls, 1);
        assert_eq!(outcome.progress.total_queries, 3);
        assert_eq!(outcome.progress.queries_processed, 3);
    }

    #[tokio::test]
    async fn test_root_generation_failure_returns_empty() {
        let fixture = Fixture::new(true);
        let outcome = fixture.engine().run("rust", 3, 2, 2).await.unwrap();

        assert!(outcome.learnings.is_empty());
        assert!(outcome.visited_urls.is_empty());
        assert_eq!(outcome.stats.failed_generations, 1);
        assert_eq!(fixture.executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_two_levels_call_counts() {
        let fixture = Fixture::new(false);
        let outcome = fixture.engine().run("rust", 2, 2, 4).await.unwrap();

        // Root: 1 generation + 2 branches; each branch: 1 generation + 1 branch.
        assert_eq!(fixture.generator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fixture.executor.calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.progress.current_depth, 2);
        assert_eq!(outcome.progress.current_breadth, 1);
        assert_eq!(outcome.progress.total_queries, 4);
    }

    #[test]
    fn test_branch_stage_display() {
        assert_eq!(BranchStage::Search.to_string(), "search");
        assert_eq!(BranchStage::Generation.to_string(), "generation");
    }
}
