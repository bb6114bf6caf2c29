mod cache;
mod config;
mod export;
mod github;
mod models;
mod service;
mod ui;

use chrono::NaiveDate;
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use config::{Config, CONFIG_FILE};
use export::ExportFormat;
use service::{AnalyzeOptions, Service, ServiceError};
use ui::{ProgressDisplay, ProgressSink, SilentProgress};

/// PR Export: CLI tool that caches a repository's pull requests, reviews,
/// comments and file diffs locally and exports them as JSONL or CSV.
#[derive(Parser, Debug)]
#[command(name = "pr-export", version, about)]
struct Cli {
    /// Repository to export (e.g., golang/go)
    ///
    /// Not required when --init-config is used.
    repo: Option<String>,

    /// Output format (defaults to [export] default_format in .pr-export.toml)
    #[arg(short, long, value_enum)]
    format: Option<ExportFormat>,

    /// Number of most recently updated PRs to export
    #[arg(short, long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    limit: u64,

    /// Export every cached PR, ignoring --limit
    #[arg(long)]
    all: bool,

    /// Include patch text and code-comment diff context
    #[arg(long)]
    include_diffs: bool,

    /// Report the run as a forced refresh instead of showing cache freshness
    #[arg(long)]
    refetch: bool,

    /// Only PRs updated on or after this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_since)]
    since: Option<NaiveDate>,

    /// Fetch and export a single PR by number
    #[arg(long = "pr")]
    pr_number: Option<u64>,

    /// Output file path (defaults to a name derived from the repo and filters)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Delete cached data before fetching
    #[arg(long)]
    clear_cache: bool,

    /// Write a default .pr-export.toml to the current directory and exit
    #[arg(long)]
    init_config: bool,
}

fn parse_since(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{value}', expected YYYY-MM-DD"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.init_config {
        let path = Path::new(CONFIG_FILE);
        if path.exists() {
            return Err(format!("{CONFIG_FILE} already exists").into());
        }
        Config::default().save(path)?;
        info!(path = %path.display(), "wrote default configuration");
        println!("Wrote {CONFIG_FILE}");
        return Ok(());
    }

    let repo = cli.repo.clone().ok_or(
        "repository is required unless --init-config is used. Usage: pr-export <owner/repo>",
    )?;

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => return Err(report(err.into()).await),
    };
    debug!(api_url = %config.github.api_url, cache = %config.cache.location.display(), "loaded configuration");

    let options = AnalyzeOptions {
        format: cli.format.unwrap_or(config.export.default_format),
        repo,
        limit: Some(cli.limit),
        all: cli.all,
        include_diffs: cli.include_diffs,
        refetch: cli.refetch,
        since: cli.since,
        pr_number: cli.pr_number,
        output: cli.output,
        clear_cache: cli.clear_cache,
    };

    let mut service = match Service::new(config, progress_sink()) {
        Ok(service) => service,
        Err(err) => return Err(report(err).await),
    };

    let span = info_span!("pr_export", repo = %options.repo);
    let outcome = service.analyze(&options).instrument(span).await?;
    info!(exported = outcome.exported, path = %outcome.path.display(), "done");

    Ok(())
}

/// Tree output for interactive terminals, nothing when stdout is piped.
fn progress_sink() -> Box<dyn ProgressSink> {
    if std::io::stdout().is_terminal() {
        Box::new(ProgressDisplay::new())
    } else {
        Box::new(SilentProgress)
    }
}

async fn report(err: ServiceError) -> Box<dyn std::error::Error> {
    progress_sink().show_error(&err.to_string()).await;
    err.into()
}
