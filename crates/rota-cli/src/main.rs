#![forbid(unsafe_code)]

mod cmd;
mod output;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use rota_core::config::load_config;
use std::env;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::output::{CliError, render_error, resolve_output_mode};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "rota: cycle-aware posting tracker with mirrored local/remote state",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging and detailed output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Project config file (default: .rota/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Defaults to `stats`.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Sync",
        about = "Synchronize the local file and the remote document",
        long_about = "Pull, push, merge, or compare the local state file and the remote document.",
        after_help = "EXAMPLES:\n    # See whether both sides agree\n    rota sync --status\n\n    # Merge both sides and write the result everywhere\n    rota sync --auto\n\n    # Overwrite local with remote even if local is newer\n    rota sync --from-remote --force\n\n    # Preview a push\n    rota sync --to-remote --dry-run"
    )]
    Sync(cmd::sync::SyncArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Check the state for problems",
        long_about = "Run the structure, id, cycle, timestamp, consistency and sync checks.",
        after_help = "EXAMPLES:\n    # Validate everything\n    rota validate\n\n    # Remove orphaned ids from one category\n    rota validate --category spells --fix\n\n    # Write a Markdown report\n    rota validate --report-file docs/validation_report.md"
    )]
    Validate(cmd::validate::ValidateArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Create the remote state document",
        long_about = "Create a private remote document holding a fresh state and print its id.",
        after_help = "EXAMPLES:\n    ROTA_TOKEN=... rota create-remote-document --description \"bot state\""
    )]
    CreateRemoteDocument(cmd::create_remote::CreateRemoteArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show posting counts per category",
        after_help = "EXAMPLES:\n    rota stats\n    rota stats --json"
    )]
    Stats(cmd::stats::StatsArgs),

    #[command(
        next_help_heading = "Posting",
        about = "Pick a random unposted item",
        long_about = "Pick a random item not yet posted in the current cycle. Starts a new cycle when every item has been posted.",
        after_help = "EXAMPLES:\n    # Preview the next spell\n    rota pick spells\n\n    # Pick and record it\n    rota pick spells --mark --json"
    )]
    Pick(cmd::pick::PickArgs),

    #[command(
        next_help_heading = "Posting",
        about = "Record an item as posted",
        after_help = "EXAMPLES:\n    rota mark spells lumos"
    )]
    Mark(cmd::mark::MarkArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("ROTA_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "rota=debug,info"
        } else {
            "rota=info,warn"
        })
    });

    let format = env::var("ROTA_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = resolve_output_mode(cli.json);
    let project_root = env::current_dir().context("failed to read current directory")?;

    let config = match load_config(&project_root, cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            render_error(output, &CliError::coded(err.code(), err.to_string()))?;
            anyhow::bail!("configuration invalid");
        }
    };
    debug!(state = %config.state.local_path().display(), "configuration loaded");

    let ctx = cmd::Context {
        config,
        output,
        verbose: cli.verbose,
    };

    match cli.command {
        Some(Commands::Sync(args)) => cmd::sync::run_sync(&args, &ctx),
        Some(Commands::Validate(args)) => cmd::validate::run_validate(&args, &ctx),
        Some(Commands::CreateRemoteDocument(args)) => {
            cmd::create_remote::run_create_remote(&args, &ctx)
        }
        Some(Commands::Stats(args)) => cmd::stats::run_stats(&args, &ctx),
        Some(Commands::Pick(args)) => cmd::pick::run_pick(&args, &ctx),
        Some(Commands::Mark(args)) => cmd::mark::run_mark(&args, &ctx),
        None => cmd::stats::run_stats(&cmd::stats::StatsArgs::default(), &ctx),
    }
}
