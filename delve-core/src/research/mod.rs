//! The research core: recursive query expansion, search, digestion and
//! aggregation, plus report persistence.

pub mod digest;
pub mod engine;
pub mod policy;
pub mod query;
pub mod report;
pub mod state;

pub use digest::{Digester, LlmDigester};
pub use engine::{
    BranchStage, NoOpCallback, ResearchCallback, ResearchEngine, ResearchOutcome, deep_research,
    deep_research_with_config,
};
pub use policy::{BreadthPolicy, FollowUpTopicComposer, HalvingBreadth, TopicComposer};
pub use query::{LlmQueryGenerator, QueryGenerator};
pub use report::{ResearchReport, list_reports, load_report, slugify};
pub use state::{MergeSummary, ResearchProgress, ResearchState, ResearchStats};
