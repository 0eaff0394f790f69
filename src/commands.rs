//! Short-lived daemon control verbs: start, stop, status, logs.

use std::process::{Command, Stdio};

use thiserror::Error;

use crate::config::{self, Config};
use crate::git::SystemGit;
use crate::{daemon, state, worktree};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawns `zen-watch daemon` detached, with stdout and stderr appended to
/// the log file, and records its pid.
pub fn start() -> Result<(), CommandError> {
    config::ensure_dirs()?;

    if let Some(pid) = daemon::running_pid() {
        println!("Watch daemon already running (PID: {pid})");
        return Ok(());
    }

    let exe = std::env::current_exe()?;
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(daemon::log_file())?;

    let child = Command::new(exe)
        .arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        .spawn()?;

    std::fs::write(daemon::pid_file(), child.id().to_string())?;

    println!("Watch daemon started (PID: {})", child.id());
    println!("Log file: {}", daemon::log_file().display());
    Ok(())
}

/// SIGTERMs the recorded daemon pid.
pub fn stop() -> Result<(), CommandError> {
    let Some(pid) = daemon::running_pid() else {
        println!("Watch daemon is not running");
        return Ok(());
    };

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    let _ = std::fs::remove_file(daemon::pid_file());

    println!("Watch daemon stopped (PID: {pid})");
    Ok(())
}

/// Prints daemon liveness, the last poll summary, and worktree counts.
pub fn status(cfg: &Config) -> Result<(), CommandError> {
    println!();
    println!("Watch Daemon Status");

    match daemon::running_pid() {
        Some(pid) => {
            println!("Status: Running");
            println!("PID: {pid}");
        }
        None => println!("Status: Not running"),
    }
    println!();

    if let Some(check) = state::load_checkpoint(&config::state_dir()) {
        println!("Last check:");
        println!("  Time: {}", check.timestamp.to_rfc3339());
        println!("  PRs found: {}", check.pr_count);
        println!();
    }

    if cfg.authors.is_empty() {
        println!("Auto-setup: disabled (no authors configured)");
    } else {
        println!("Auto-setup authors: {}", cfg.authors.join(" "));
    }

    let stats = worktree::stats(cfg, &SystemGit);
    println!();
    println!(
        "Worktrees: {} total ({} PR reviews, {} feature)",
        stats.total, stats.pr_reviews, stats.features
    );
    println!();
    Ok(())
}

/// Tails the live daemon log.
pub fn logs_tail() -> Result<(), CommandError> {
    let log = daemon::log_file();
    if !log.exists() {
        println!("No log file found. Start the daemon with 'zen-watch start'.");
        return Ok(());
    }

    Command::new("tail").arg("-f").arg(&log).status()?;
    Ok(())
}

/// Greps the live and rotated logs for a term.
pub fn logs_search(term: &str) -> Result<(), CommandError> {
    let log = daemon::log_file();
    let files = [log.clone(), log.with_extension("log.1")];

    let mut found = false;
    for file in &files {
        if !file.exists() {
            continue;
        }
        let status = Command::new("grep")
            .args(["-n", "-i", term])
            .arg(file)
            .status()?;
        if status.success() {
            found = true;
        }
    }

    if !found {
        println!("No matches for {term:?} in daemon logs.");
    }
    Ok(())
}
