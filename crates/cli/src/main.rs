//! # AgentForm CLI
//!
//! Operator commands for the form pipeline: statistics, metrics, recovery of
//! stuck forms, failed-job management and a standalone job worker.

mod commands;

use clap::{Parser, Subcommand};
use tracing::info;

use agentform_infra::config::Settings;
use agentform_infra::services::build_services;
use agentform_observability::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "agentform")]
#[command(about = "Command-line interface for the AgentForm pipeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file path (default: $AGENTFORM_CONFIG, then ./agentform.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Log verbosity (use multiple times for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Display form processing statistics
    Stats {
        /// Refresh the display every 5 seconds
        #[arg(long)]
        refresh: bool,
    },

    /// Display the queue metrics dashboard
    Metrics {
        /// Refresh the display every 10 seconds
        #[arg(long)]
        refresh: bool,
        /// Store a trend snapshot and exit
        #[arg(long)]
        store: bool,
    },

    /// Collect and cache every metric group
    Collect {
        /// Show detailed output
        #[arg(long)]
        show: bool,
    },

    /// Requeue jobs for forms that were never verified or emailed
    Requeue(RequeueArgs),

    /// Failed job management
    #[command(subcommand)]
    Failed(FailedCommands),

    /// Run job workers until Ctrl-C
    Work {
        /// Queues to poll, in priority order (default: from config)
        #[arg(short, long = "queue", value_name = "QUEUE")]
        queues: Vec<String>,
        /// Number of concurrent workers (default: from config)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Create sample forms and queue their verification
    Seed {
        /// Number of forms to create
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[derive(Debug, clap::Args)]
pub struct RequeueArgs {
    /// Show what would be requeued without queueing anything
    #[arg(long)]
    pub dry_run: bool,
    /// Only requeue forms older than this many hours
    #[arg(long, value_name = "HOURS", default_value_t = 1)]
    pub older_than: u32,
    /// Maximum number of forms per stage
    #[arg(long, default_value_t = 100)]
    pub limit: usize,
    /// Only requeue verification jobs
    #[arg(long)]
    pub verification_only: bool,
    /// Only requeue welcome email jobs
    #[arg(long)]
    pub email_only: bool,
    /// Skip the confirmation prompt
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Subcommand)]
pub enum FailedCommands {
    /// List failed jobs, newest first
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Move a failed job back onto its queue
    Retry {
        #[arg(value_name = "FAILED_JOB_ID")]
        id: String,
    },
    /// Retry every failed job
    RetryAll,
    /// Delete a failed job
    Forget {
        #[arg(value_name = "FAILED_JOB_ID")]
        id: String,
    },
}

/// Each `-v` raises the configured level one step past the default.
fn log_level(verbose: u8, configured: &str) -> &str {
    match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = match cli.config.as_deref() {
        Some(path) => Settings::load_from(Some(path))?,
        None => Settings::load()?,
    };

    let level = log_level(cli.verbose, &settings.log.level);
    agentform_observability::init(level, LogFormat::from_json_flag(settings.log.json));

    let services = build_services(&settings).await?;
    info!(command = ?cli.command, "agentform cli starting");

    match cli.command {
        Commands::Stats { refresh } => commands::stats::run(&services, refresh).await,
        Commands::Metrics { refresh, store } => {
            commands::metrics::run(&services, refresh, store).await
        }
        Commands::Collect { show } => commands::metrics::collect(&services, show).await,
        Commands::Requeue(args) => commands::requeue::run(&services, args, cli.verbose > 0).await,
        Commands::Failed(cmd) => commands::failed::run(&services, cmd).await,
        Commands::Work {
            queues,
            concurrency,
        } => commands::work::run(&services, &settings, queues, concurrency).await,
        Commands::Seed { count } => commands::seed::run(&services, count).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requeue_flags_parse() {
        let cli = Cli::try_parse_from([
            "agentform",
            "requeue",
            "--dry-run",
            "--older-than",
            "6",
            "--limit",
            "10",
            "--email-only",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Requeue(args) => {
                assert!(args.dry_run);
                assert_eq!(args.older_than, 6);
                assert_eq!(args.limit, 10);
                assert!(args.email_only);
                assert!(!args.verification_only);
                assert!(!args.force);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn verbosity_flags_raise_the_log_level() {
        assert_eq!(log_level(0, "info"), "info");
        assert_eq!(log_level(1, "info"), "debug");
        assert_eq!(log_level(2, "info"), "trace");
        assert_eq!(log_level(5, "warn"), "trace");
    }

    #[test]
    fn work_accepts_repeated_queues() {
        let cli = Cli::try_parse_from([
            "agentform",
            "work",
            "--queue",
            "email",
            "--queue",
            "verification",
            "--concurrency",
            "4",
        ])
        .unwrap();

        match cli.command {
            Commands::Work {
                queues,
                concurrency,
            } => {
                assert_eq!(queues, ["email", "verification"]);
                assert_eq!(concurrency, Some(4));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn failed_retry_takes_an_id() {
        let cli = Cli::try_parse_from(["agentform", "failed", "retry", "abc"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Failed(FailedCommands::Retry { id }) if id == "abc"
        ));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
