//! Delve CLI: run deep research from the terminal and manage saved reports.

mod commands;

use clap::Parser;
use delve_core::SearchBackend;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Delve: breadth/depth-bounded deep research over web search and an LLM
#[derive(Parser, Debug)]
#[command(name = "delve", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (reads `.delve/config.toml` from here)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress progress output and non-error logs
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Research a topic and save a report
    Research {
        /// Topic to research
        topic: String,

        /// Queries generated at the top level (halved at each level below)
        #[arg(short, long)]
        breadth: Option<usize>,

        /// Levels of follow-up research
        #[arg(short, long)]
        depth: Option<usize>,

        /// Maximum search + digest pairs in flight
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// LLM model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Search backend: firecrawl or duckduckgo
        #[arg(long)]
        search: Option<SearchBackend>,

        /// Directory to write the report to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not write a report file
        #[arg(long)]
        no_save: bool,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Browse saved reports
    Reports {
        #[command(subcommand)]
        action: ReportsAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ReportsAction {
    /// List saved reports, newest first
    List {
        /// Reports directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Print one saved report
    Show {
        /// Report slug (file name without `.json`)
        slug: String,

        /// Reports directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default `.delve/config.toml` into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Credentials usually live in a .env next to the workspace.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "delve", "delve")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "delve.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.quiet).await
}
