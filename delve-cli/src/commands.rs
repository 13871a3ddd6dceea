//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::ReportsAction;
use delve_core::config::{DelveConfig, load_config};
use delve_core::research::{
    BranchStage, ResearchCallback, ResearchEngine, ResearchProgress, ResearchReport, list_reports,
    load_report,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path, quiet: bool) -> anyhow::Result<()> {
    match command {
        Commands::Research {
            topic,
            breadth,
            depth,
            concurrency,
            model,
            search,
            output,
            no_save,
            json,
        } => {
            let mut config = load_workspace_config(workspace)?;
            if let Some(model) = model {
                config.llm.model = model;
            }
            if let Some(backend) = search {
                config.search.backend = backend;
            }
            let request = ResearchRequest {
                breadth: breadth.unwrap_or(config.research.breadth),
                depth: depth.unwrap_or(config.research.depth),
                concurrency: concurrency.unwrap_or(config.research.concurrency),
                topic,
            };
            let reports_dir = (!no_save)
                .then(|| output.unwrap_or_else(|| config.research.resolved_reports_dir()));
            handle_research(&config, request, reports_dir, json, quiet).await
        }
        Commands::Reports { action } => handle_reports(action, workspace),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load_workspace_config(workspace: &Path) -> anyhow::Result<DelveConfig> {
    let config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    tracing::debug!(
        workspace = %workspace.display(),
        model = %config.llm.model,
        backend = ?config.search.backend,
        "Loaded configuration"
    );
    Ok(config)
}

struct ResearchRequest {
    topic: String,
    breadth: usize,
    depth: usize,
    concurrency: usize,
}

async fn handle_research(
    config: &DelveConfig,
    request: ResearchRequest,
    reports_dir: Option<PathBuf>,
    json: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let mut engine = ResearchEngine::from_config(config)?;
    if !quiet {
        engine = engine.with_callback(Arc::new(ProgressPrinter));
    }

    let outcome = engine
        .run(
            &request.topic,
            request.breadth,
            request.depth,
            request.concurrency,
        )
        .await?;

    let report = ResearchReport::new(
        &request.topic,
        request.breadth,
        request.depth,
        &config.llm.model,
        outcome,
    );

    if let Some(dir) = reports_dir {
        let path = report.save(&dir)?;
        if !quiet {
            eprintln!("Report saved to {}", path.display());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}

fn handle_reports(action: ReportsAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ReportsAction::List { dir } => {
            let dir = reports_dir(dir, workspace)?;
            let reports = list_reports(&dir)?;
            if reports.is_empty() {
                println!("No reports in {}", dir.display());
                return Ok(());
            }
            println!("Reports in {}:\n", dir.display());
            for report in &reports {
                println!("{}", render_summary_line(report));
            }
            Ok(())
        }
        ReportsAction::Show { slug, dir, json } => {
            let dir = reports_dir(dir, workspace)?;
            let Some(report) = load_report(&dir, &slug)? else {
                anyhow::bail!("No report named '{}' in {}", slug, dir.display());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_report(&report));
            }
            Ok(())
        }
    }
}

fn reports_dir(explicit: Option<PathBuf>, workspace: &Path) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => Ok(load_workspace_config(workspace)?
            .research
            .resolved_reports_dir()),
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".delve");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            std::fs::write(&config_path, DelveConfig::default().to_toml()?)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_workspace_config(workspace)?;
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Prints progress lines to stderr so stdout stays clean for `--json`.
struct ProgressPrinter;

impl ResearchCallback for ProgressPrinter {
    fn on_progress(&self, progress: &ResearchProgress) {
        eprintln!("{}", render_progress(progress));
    }

    fn on_branch_failed(&self, stage: BranchStage, subject: &str, error: &dyn std::error::Error) {
        let subject = subject.lines().next().unwrap_or(subject);
        eprintln!("  skipped ({stage}) {subject}: {error}");
    }
}

fn render_progress(progress: &ResearchProgress) -> String {
    format!(
        "[depth {}/{} | breadth {}] {}/{} queries ({:.0}%)",
        progress.current_depth,
        progress.total_depth,
        progress.current_breadth,
        progress.queries_processed,
        progress.total_queries,
        progress.fraction_done() * 100.0
    )
}

fn render_summary_line(report: &ResearchReport) -> String {
    format!(
        "  {:<50}  {}  {:>3} learnings  {:>3} sources",
        report.slug(),
        report.created_at.format("%Y-%m-%d %H:%M"),
        report.learnings.len(),
        report.visited_urls.len()
    )
}

fn render_report(report: &ResearchReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", report.topic));
    out.push_str(&format!(
        "breadth {} | depth {} | model {} | {}\n",
        report.breadth,
        report.depth,
        report.model,
        report.created_at.format("%Y-%m-%d %H:%M UTC")
    ));

    out.push_str(&format!("\n## Learnings ({})\n\n", report.learnings.len()));
    if report.learnings.is_empty() {
        out.push_str("(none)\n");
    }
    for (i, learning) in report.learnings.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, learning));
    }

    out.push_str(&format!("\n## Sources ({})\n\n", report.visited_urls.len()));
    for url in &report.visited_urls {
        out.push_str(&format!("- {url}\n"));
    }

    let stats = &report.stats;
    out.push_str(&format!(
        "\n{} generations, {} searches, {} digests, {} failed branches\n",
        stats.generator_calls, stats.search_calls, stats.digest_calls, stats.failed_branches
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::research::ResearchOutcome;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn report() -> ResearchReport {
        ResearchReport::new(
            "Rust ownership",
            2,
            1,
            "gpt-4o-mini",
            ResearchOutcome {
                learnings: vec![
                    "Ownership prevents use-after-free".into(),
                    "Borrow checker enforces aliasing rules".into(),
                ],
                visited_urls: vec!["https://doc.rust-lang.org/book/ch04-01-what-is-ownership.html".into()],
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_render_report_lists_learnings_and_sources() {
        let text = render_report(&report());
        assert!(text.starts_with("# Rust ownership\n"));
        assert!(text.contains("## Learnings (2)"));
        assert!(text.contains("2. Borrow checker enforces aliasing rules"));
        assert!(text.contains("- https://doc.rust-lang.org/book/ch04-01-what-is-ownership.html"));
    }

    #[test]
    fn test_render_progress() {
        let progress = ResearchProgress {
            current_depth: 1,
            total_depth: 2,
            current_breadth: 4,
            total_breadth: 4,
            queries_processed: 1,
            total_queries: 4,
        };
        assert_eq!(
            render_progress(&progress),
            "[depth 1/2 | breadth 4] 1/4 queries (25%)"
        );
    }

    #[test]
    fn test_summary_line_contains_slug() {
        let line = render_summary_line(&report());
        assert!(line.contains("rust_ownership"));
        assert!(line.contains("2 learnings"));
    }

    #[test]
    fn test_config_init_writes_once() {
        let dir = TempDir::new().unwrap();
        handle_config(ConfigAction::Init, dir.path()).unwrap();
        let path = dir.path().join(".delve").join("config.toml");
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("gpt-4o-mini"));

        std::fs::write(&path, "# edited\n").unwrap();
        handle_config(ConfigAction::Init, dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# edited\n");
    }

    #[test]
    fn test_show_missing_report_fails() {
        let dir = TempDir::new().unwrap();
        let err = handle_reports(
            ReportsAction::Show {
                slug: "nope".into(),
                dir: Some(dir.path().to_path_buf()),
                json: false,
            },
            dir.path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("No report named 'nope'"));
    }
}
