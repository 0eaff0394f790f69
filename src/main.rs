//! zen-watch - daemon control surface.
//!
//! The binary is short-lived for every verb except `daemon`, which runs
//! the watch loop in-process (and is what `start` spawns detached).

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zen_watch::commands;
use zen_watch::config::Config;
use zen_watch::daemon;

#[derive(Parser)]
#[command(name = "zen-watch", version, about = "Background daemon for GitHub review-request worktrees")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the background daemon
    Start,

    /// Stop the background daemon
    Stop,

    /// Show daemon status
    Status,

    /// Tail the daemon log
    Logs {
        #[command(subcommand)]
        action: Option<LogsAction>,
    },

    /// Run the daemon loop in-process
    #[command(hide = true)]
    Daemon,
}

#[derive(Subcommand)]
enum LogsAction {
    /// Search logs for a PR number, worktree, or keyword
    Search { term: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Start => commands::start()?,
        Command::Stop => commands::stop()?,
        Command::Status => {
            let cfg = Config::load()?;
            commands::status(&cfg)?;
        }
        Command::Logs { action } => match action {
            None => commands::logs_tail()?,
            Some(LogsAction::Search { term }) => commands::logs_search(&term)?,
        },
        Command::Daemon => {
            // The daemon's stdout/stderr are the log file; timestamped
            // line-oriented output goes straight there.
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "zen_watch=info".into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let cfg = Config::load()?;
            daemon::run(cfg).await?;
        }
    }
    Ok(())
}
