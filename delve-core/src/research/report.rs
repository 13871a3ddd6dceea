//! Saved research reports.
//!
//! A report is one run's outcome plus the parameters that produced it, stored as
//! `<reports_dir>/<slug>.json`. Saving the same topic twice overwrites the file.

use super::engine::ResearchOutcome;
use super::state::ResearchStats;
use crate::error::Result;
use crate::persistence::{json_files, read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

const MAX_SLUG_CHARS: usize = 50;

/// A persisted research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub id: Uuid,
    pub topic: String,
    pub breadth: usize,
    pub depth: usize,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub learnings: Vec<String>,
    pub visited_urls: Vec<String>,
    #[serde(default)]
    pub stats: ResearchStats,
}

impl ResearchReport {
    pub fn new(
        topic: impl Into<String>,
        breadth: usize,
        depth: usize,
        model: impl Into<String>,
        outcome: ResearchOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            breadth,
            depth,
            model: model.into(),
            created_at: Utc::now(),
            learnings: outcome.learnings,
            visited_urls: outcome.visited_urls,
            stats: outcome.stats,
        }
    }

    pub fn slug(&self) -> String {
        slugify(&self.topic)
    }

    /// Write the report to `<dir>/<slug>.json`, returning the path written.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = report_path(dir, &self.slug());
        write_json_atomic(&path, self)?;
        info!(path = %path.display(), learnings = self.learnings.len(), "Saved research report");
        Ok(path)
    }
}

/// File-safe name for a topic: lowercased, anything outside `[a-z0-9_-]` becomes
/// `_`, capped at 50 characters.
pub fn slugify(topic: &str) -> String {
    let slug: String = topic
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SLUG_CHARS)
        .collect();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

pub fn report_path(dir: &Path, slug: &str) -> PathBuf {
    dir.join(format!("{slug}.json"))
}

/// Load the report stored under `slug`, if any.
pub fn load_report(dir: &Path, slug: &str) -> Result<Option<ResearchReport>> {
    Ok(read_json(&report_path(dir, slug))?)
}

/// All readable reports in `dir`, newest first. Unreadable files are skipped.
pub fn list_reports(dir: &Path) -> Result<Vec<ResearchReport>> {
    let mut reports = Vec::new();
    for path in json_files(dir)? {
        match read_json::<ResearchReport>(&path) {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable report"),
        }
    }
    reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(reports)
}
