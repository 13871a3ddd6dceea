//! # Delve Core
//!
//! Core library for Delve, a recursive deep-research engine.
//! Provides the research engine, LLM interface (brain), search executors,
//! configuration, report persistence, and fundamental types.

pub mod brain;
pub mod config;
pub mod error;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod retry;
pub mod search;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{DelveConfig, SearchBackend, load_config};
pub use error::{ConfigError, DelveError, Result};
pub use research::{
    Digester, QueryGenerator, ResearchCallback, ResearchEngine, ResearchOutcome,
    ResearchProgress, ResearchReport, ResearchStats, deep_research, deep_research_with_config,
};
pub use search::SearchExecutor;
pub use types::{ResearchDigest, SearchQuery, SearchResult};
