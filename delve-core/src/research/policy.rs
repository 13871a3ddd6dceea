//! Narrowing and recomposition policies for the research tree.

use crate::types::{ResearchDigest, SearchQuery};

/// Decides how many queries a child level may generate.
pub trait BreadthPolicy: Send + Sync {
    /// Breadth for the level below one running at `breadth`. Must be at least 1.
    fn next_breadth(&self, breadth: usize) -> usize;
}

/// Halve the breadth at every level, rounding up: 4 -> 2 -> 1 -> 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalvingBreadth;

impl BreadthPolicy for HalvingBreadth {
    fn next_breadth(&self, breadth: usize) -> usize {
        breadth.div_ceil(2).max(1)
    }
}

/// Builds the topic a branch hands to its child level.
pub trait TopicComposer: Send + Sync {
    fn compose(&self, root_topic: &str, query: &SearchQuery, digest: &ResearchDigest) -> String;
}

/// Child topic = the query's research goal, anchored to the root topic, followed
/// by what the branch learned and the questions it left open.
#[derive(Debug, Clone, Copy, Default)]
pub struct FollowUpTopicComposer;

impl TopicComposer for FollowUpTopicComposer {
    fn compose(&self, root_topic: &str, query: &SearchQuery, digest: &ResearchDigest) -> String {
        let mut topic = String::new();
        if query.reasoning.trim().is_empty() {
            topic.push_str(&format!("Research goal: {}\n", query.query));
        } else {
            topic.push_str(&format!("Research goal: {}\n", query.reasoning.trim()));
        }
        topic.push_str(&format!("Original topic: {root_topic}\n"));
        topic.push_str(&format!("Previous query: {}\n", query.query));

        if !digest.learnings.is_empty() {
            topic.push_str("\nWhat we learned:\n");
            for learning in &digest.learnings {
                topic.push_str(&format!("- {learning}\n"));
            }
        }
        if !digest.follow_up_questions.is_empty() {
            topic.push_str("\nFollow-up directions:\n");
            for question in &digest.follow_up_questions {
                topic.push_str(&format!("- {question}\n"));
            }
        }
        topic.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_halving_breadth() {
        let policy = HalvingBreadth;
        assert_eq!(policy.next_breadth(4), 2);
        assert_eq!(policy.next_breadth(3), 2);
        assert_eq!(policy.next_breadth(2), 1);
        assert_eq!(policy.next_breadth(1), 1);
    }

    #[test]
    fn test_compose_includes_follow_ups() {
        let query = SearchQuery::new("rust borrow checker", "Understand aliasing rules");
        let digest = ResearchDigest {
            learnings: vec!["Borrows are checked at compile time".into()],
            follow_up_questions: vec!["How do lifetimes interact with async?".into()],
        };
        let topic = FollowUpTopicComposer.compose("rust ownership", &query, &digest);

        assert!(topic.starts_with("Research goal: Understand aliasing rules"));
        assert!(topic.contains("Original topic: rust ownership"));
        assert!(topic.contains("- Borrows are checked at compile time"));
        assert!(topic.ends_with("- How do lifetimes interact with async?"));
    }

    #[test]
    fn test_compose_falls_back_to_query_without_reasoning() {
        let query = SearchQuery::new("tokio semaphore", "  ");
        let topic = FollowUpTopicComposer.compose("async", &query, &ResearchDigest::default());
        assert!(topic.starts_with("Research goal: tokio semaphore"));
        assert!(!topic.contains("What we learned"));
    }

    proptest! {
        #[test]
        fn prop_halving_is_ceil_and_positive(breadth in 1usize..10_000) {
            let next = HalvingBreadth.next_breadth(breadth);
            prop_assert!(next >= 1);
            prop_assert!(next <= breadth);
            prop_assert_eq!(next, (breadth + 1) / 2);
        }
    }
}
