//! Shared accumulator and observability counters for one research run.
//!
//! `ResearchState` is created per top-level call and shared by every branch of
//! the tree. Learnings and URLs are deduplicated on exact string equality and
//! kept in first-insertion order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Accumulated {
    learnings: Vec<String>,
    seen_learnings: HashSet<String>,
    urls: Vec<String>,
    seen_urls: HashSet<String>,
}

/// Deduplicated learnings and visited URLs, shared across branches.
#[derive(Debug, Default)]
pub struct ResearchState {
    inner: Mutex<Accumulated>,
}

/// How many new entries a merge actually added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub new_learnings: usize,
    pub new_urls: usize,
}

impl ResearchState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Accumulated> {
        // A panicking branch must not take the whole run's results with it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merge one branch's contribution. Both sets are updated under one lock, so
    /// other branches never observe a half-applied merge.
    pub fn merge<L, U>(&self, learnings: L, urls: U) -> MergeSummary
    where
        L: IntoIterator,
        L::Item: Into<String>,
        U: IntoIterator,
        U::Item: Into<String>,
    {
        let mut acc = self.lock();
        let mut summary = MergeSummary::default();

        for learning in learnings {
            let learning = learning.into();
            if acc.seen_learnings.insert(learning.clone()) {
                acc.learnings.push(learning);
                summary.new_learnings += 1;
            }
        }
        for url in urls {
            let url = url.into();
            if acc.seen_urls.insert(url.clone()) {
                acc.urls.push(url);
                summary.new_urls += 1;
            }
        }
        summary
    }

    /// Snapshot of the learnings accumulated so far.
    pub fn learnings(&self) -> Vec<String> {
        self.lock().learnings.clone()
    }

    /// Snapshot of the visited URLs accumulated so far.
    pub fn visited_urls(&self) -> Vec<String> {
        self.lock().urls.clone()
    }

}

/// Snapshot of how far a run has progressed.
///
/// Depth is reported as the deepest level entered so far (1-based), so it only
/// grows. `total_queries` is a lower bound that rises as levels generate queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchProgress {
    pub current_depth: usize,
    pub total_depth: usize,
    pub current_breadth: usize,
    pub total_breadth: usize,
    pub queries_processed: usize,
    pub total_queries: usize,
}

impl ResearchProgress {
    pub fn new(total_breadth: usize, total_depth: usize) -> Self {
        Self {
            total_breadth,
            total_depth,
            ..Default::default()
        }
    }

    /// Record that a level generated `queries` queries at `level` with `breadth`.
    pub fn level_started(&mut self, level: usize, breadth: usize, queries: usize) {
        if level >= self.current_depth {
            self.current_depth = level;
            self.current_breadth = breadth;
        }
        self.total_queries += queries;
    }

    /// Record one finished branch, successful or not.
    pub fn query_finished(&mut self) {
        self.queries_processed += 1;
    }

    /// Fraction of known queries processed, in `0.0..=1.0`.
    pub fn fraction_done(&self) -> f32 {
        if self.total_queries == 0 {
            0.0
        } else {
            (self.queries_processed as f32 / self.total_queries as f32).min(1.0)
        }
    }
}

/// Counters over every collaborator call made during a run.
#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    generator_calls: AtomicUsize,
    search_calls: AtomicUsize,
    digest_calls: AtomicUsize,
    failed_generations: AtomicUsize,
    failed_branches: AtomicUsize,
}

impl StatsCounter {
    pub(crate) fn generator_call(&self) {
        self.generator_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn search_call(&self) {
        self.search_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn digest_call(&self) {
        self.digest_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed_generation(&self) {
        self.failed_generations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed_branch(&self) {
        self.failed_branches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ResearchStats {
        ResearchStats {
            generator_calls: self.generator_calls.load(Ordering::Relaxed),
            search_calls: self.search_calls.load(Ordering::Relaxed),
            digest_calls: self.digest_calls.load(Ordering::Relaxed),
            failed_generations: self.failed_generations.load(Ordering::Relaxed),
            failed_branches: self.failed_branches.load(Ordering::Relaxed),
        }
    }
}

/// Summary of the collaborator calls one run made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchStats {
    pub generator_calls: usize,
    pub search_calls: usize,
    pub digest_calls: usize,
    pub failed_generations: usize,
    pub failed_branches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_merge_dedups_and_keeps_first_order() {
        let state = ResearchState::new();
        state.merge(["b", "a"], ["https://x"]);
        let summary = state.merge(["a", "c", "b"], ["https://y", "https://x"]);

        assert_eq!(
            summary,
            MergeSummary {
                new_learnings: 1,
                new_urls: 1
            }
        );
        assert_eq!(state.learnings(), vec!["b", "a", "c"]);
        assert_eq!(state.visited_urls(), vec!["https://x", "https://y"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let state = ResearchState::new();
        state.merge(["one", "two"], ["u1"]);
        let before = (state.learnings(), state.visited_urls());
        let summary = state.merge(["one", "two"], ["u1"]);
        assert_eq!(summary, MergeSummary::default());
        assert_eq!((state.learnings(), state.visited_urls()), before);
    }

    #[test]
    fn test_dedup_is_exact_not_normalized() {
        let state = ResearchState::new();
        state.merge(["Rust", "rust", "rust "], ["https://a/", "https://a"]);
        assert_eq!(state.learnings().len(), 3);
        assert_eq!(state.visited_urls().len(), 2);
    }

    #[test]
    fn test_concurrent_merges() {
        let state = Arc::new(ResearchState::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        state.merge([format!("l{}", (i + j) % 20)], [format!("u{j}")]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.learnings().len(), 20);
        assert_eq!(state.visited_urls().len(), 50);
    }

    #[test]
    fn test_progress_depth_never_decreases() {
        let mut progress = ResearchProgress::new(4, 3);
        progress.level_started(1, 4, 4);
        progress.level_started(2, 2, 2);
        progress.level_started(1, 4, 0);
        assert_eq!(progress.current_depth, 2);
        assert_eq!(progress.current_breadth, 2);
        assert_eq!(progress.total_queries, 6);
    }

    #[test]
    fn test_progress_fraction() {
        let mut progress = ResearchProgress::new(2, 1);
        assert_eq!(progress.fraction_done(), 0.0);
        progress.level_started(1, 2, 2);
        progress.query_finished();
        assert_eq!(progress.fraction_done(), 0.5);
    }

    #[test]
    fn test_stats_snapshot() {
        let counter = StatsCounter::default();
        counter.generator_call();
        counter.search_call();
        counter.search_call();
        counter.failed_branch();
        let stats = counter.snapshot();
        assert_eq!(stats.generator_calls, 1);
        assert_eq!(stats.search_calls, 2);
        assert_eq!(stats.digest_calls, 0);
        assert_eq!(stats.failed_branches, 1);
    }

    proptest! {
        #[test]
        fn prop_learnings_are_distinct_and_bounded(
            batches in prop::collection::vec(prop::collection::vec("[a-d]{1,2}", 0..5), 0..10)
        ) {
            let state = ResearchState::new();
            let mut emitted = 0;
            for batch in &batches {
                emitted += batch.len();
                state.merge(batch.clone(), Vec::<String>::new());
            }
            let learnings = state.learnings();
            let distinct: HashSet<_> = learnings.iter().collect();
            prop_assert_eq!(distinct.len(), learnings.len());
            prop_assert!(learnings.len() <= emitted);

            let all: HashSet<_> = batches.iter().flatten().collect();
            prop_assert_eq!(all.len(), learnings.len());
        }

        #[test]
        fn prop_first_insertion_order(items in prop::collection::vec("[a-c]", 0..30)) {
            let state = ResearchState::new();
            for item in &items {
                state.merge(Vec::<String>::new(), [item.clone()]);
            }
            let mut expected: Vec<String> = Vec::new();
            for item in items {
                if !expected.contains(&item) {
                    expected.push(item);
                }
            }
            prop_assert_eq!(state.visited_urls(), expected);
        }
    }
}
