mod commands;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use common::WorkflowId;
use gham_pipeline::config::{Config, LoggingConfig};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "gham", author, version, about = "GitHub Action Metrics: fetch workflow runs and index them in Elasticsearch", long_about = None)]
struct Cli {
    /// Config file (.yaml, .yml or .toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch workflow runs and jobs from GitHub
    Fetch {
        #[command(subcommand)]
        command: FetchCommands,
    },
    /// Index stored data in Elasticsearch
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },
    /// Show the GitHub API rate limit status
    RateLimit,
    /// Inspect the local cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Args)]
struct FetchArgs {
    /// Owner of the GitHub repository
    #[arg(long)]
    owner: String,
    /// GitHub repository
    #[arg(long)]
    repo: String,
    /// Workflow ID of the GitHub action
    #[arg(long)]
    workflow_id: WorkflowId,
    /// Directory where payloads are stored
    #[arg(long)]
    destination: PathBuf,
}

#[derive(Subcommand)]
enum FetchCommands {
    /// Fetch the latest completed runs of a workflow
    Runs {
        #[command(flatten)]
        target: FetchArgs,
        /// Date filter such as '2021-10-12' or '>=2021-10-29T22:40:19Z'
        #[arg(long)]
        created: Option<String>,
        /// Also fetch jobs for the runs fetched now
        #[arg(long)]
        with_jobs: bool,
    },
    /// Fetch jobs for stored runs that have none yet
    Jobs {
        #[command(flatten)]
        target: FetchArgs,
    },
}

#[derive(Args)]
struct IndexArgs {
    /// Elasticsearch URL (overrides elasticsearch.url from the config file)
    #[arg(long)]
    url: Option<String>,
    /// Workflow ID of the GitHub action
    #[arg(long)]
    workflow_id: WorkflowId,
    /// Directory where GitHub action payloads are stored
    #[arg(long)]
    source: PathBuf,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum IndexCommands {
    /// Index workflow runs, with job timing where jobs are stored
    Runs(IndexArgs),
    /// Index workflow jobs
    Jobs(IndexArgs),
    /// Index workflow steps
    Steps(IndexArgs),
    /// Index runs, jobs and steps
    All(IndexArgs),
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Count stored runs and job sets for a workflow
    Status {
        /// Directory where GitHub action payloads are stored
        #[arg(long)]
        source: PathBuf,
        /// Workflow ID of the GitHub action
        #[arg(long)]
        workflow_id: WorkflowId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    config.apply_env();
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    setup_logging(&config.logging)?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling in-flight requests");
            signal_token.cancel();
        }
    });

    match cli.command {
        Commands::Fetch { command } => match command {
            FetchCommands::Runs { target, created, with_jobs } => {
                commands::fetch_runs(&config, cancel, &target, created, with_jobs).await
            }
            FetchCommands::Jobs { target } => commands::fetch_jobs(&config, cancel, &target).await,
        },
        Commands::Index { command } => {
            let (target, args) = match command {
                IndexCommands::Runs(args) => (commands::IndexTarget::Runs, args),
                IndexCommands::Jobs(args) => (commands::IndexTarget::Jobs, args),
                IndexCommands::Steps(args) => (commands::IndexTarget::Steps, args),
                IndexCommands::All(args) => (commands::IndexTarget::All, args),
            };
            commands::index(&config, cancel, target, &args).await
        }
        Commands::RateLimit => commands::rate_limit(&config, cancel).await,
        Commands::Cache { command } => match command {
            CacheCommands::Status { source, workflow_id } => commands::cache_status(&source, workflow_id),
        },
    }
}

fn expand_home(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => std::env::var_os("HOME").map(|home| PathBuf::from(home).join(rest)),
        None => Some(PathBuf::from(path)),
    }
}

/// Defaults, overlaid with the given file or the first default location that exists.
fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    match path {
        Some(path) => config.merge(Config::from_file(path)?),
        None => {
            let candidates = [common::DEFAULT_CONFIG_PATH, common::USER_CONFIG_PATH];
            if let Some(found) = candidates.iter().filter_map(|p| expand_home(p)).find(|p| p.is_file()) {
                config.merge(Config::from_file(&found)?);
            }
        }
    }
    Ok(config)
}

fn setup_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let level: log::LevelFilter = logging
        .level
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {}", logging.level))?;

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Warn)
        .chain(std::io::stderr());

    if let Some(output) = &logging.output {
        let file = fern::log_file(output)
            .with_context(|| format!("Failed to open log file: {:?}", output))?;
        dispatch = dispatch.chain(file);
    }

    dispatch.apply()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_fetch_runs() {
        let cli = Cli::try_parse_from([
            "gham", "fetch", "runs", "--owner", "dhis2", "--repo", "dhis2-core",
            "--workflow-id", "10954", "--destination", "/tmp/gham", "--with-jobs",
        ])
        .unwrap();
        match cli.command {
            Commands::Fetch { command: FetchCommands::Runs { target, created, with_jobs } } => {
                assert_eq!(target.workflow_id, WorkflowId(10954));
                assert_eq!(target.owner, "dhis2");
                assert!(created.is_none());
                assert!(with_jobs);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_workflow_id() {
        let parsed = Cli::try_parse_from([
            "gham", "index", "runs", "--workflow-id", "abc", "--source", "/tmp",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_load_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gham.yaml");
        std::fs::write(&path, "github:\n  event: push\n").unwrap();

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.github.event, "push");
        assert_eq!(config.indexing.batch_size, 500);
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/etc/gham/config.yaml"), Some(PathBuf::from("/etc/gham/config.yaml")));
    }
}
