//! The watch daemon: tickers, polling, dispatch, lifecycle.
//!
//! One process per user. The control loop multiplexes four tickers
//! (poll, dispatch, cleanup-scan, log-rotate) and a root cancellation
//! token driven by SIGTERM/SIGINT. Polling discovers new review requests
//! and feeds the setup queue; dispatch ticks drain both queues through
//! their reconcilers; the cleanup scan queues merged-and-aged worktrees
//! for removal.

use std::collections::HashSet;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{self, Config, ConfigError};
use crate::dispatch::Dispatcher;
use crate::git::{GitRunner, SystemGit};
use crate::github::GitHubClient;
use crate::queue::{QueueOptions, WorkQueue};
use crate::reconcile::{CleanupReconciler, Reconcile, SetupReconciler, scan_merged_prs};
use crate::types::PrKey;
use crate::{notify, state};

/// Default bound for both workqueues.
const QUEUE_CAPACITY: usize = 10;

/// Retry cap for cleanup reconciliations.
const CLEANUP_MAX_ATTEMPTS: u32 = 3;

/// Rotate the log once it exceeds 10 MiB.
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Priority for freshly polled review requests.
const SETUP_PRIORITY: i32 = 1;

/// Errors that prevent the daemon from starting.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Another daemon instance holds the pid file.
    #[error("watch daemon already running (pid {0})")]
    AlreadyRunning(i32),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Path to the daemon pid file.
pub fn pid_file() -> PathBuf {
    config::state_dir().join("watch.pid")
}

/// Path to the daemon log file.
pub fn log_file() -> PathBuf {
    config::state_dir().join("watch.log")
}

/// Probes whether a process exists.
pub fn pid_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// The pid of a live daemon, if any. A pid file naming a dead process is
/// removed on the way through.
pub fn running_pid() -> Option<i32> {
    let data = std::fs::read_to_string(pid_file()).ok()?;
    let pid: i32 = data.trim().parse().ok()?;
    if pid_alive(pid) {
        Some(pid)
    } else {
        let _ = std::fs::remove_file(pid_file());
        None
    }
}

/// Runs the daemon loop until a termination signal arrives.
pub async fn run(cfg: Config) -> Result<(), DaemonError> {
    config::ensure_dirs()?;
    let pid_path = acquire_pid_file()?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let cfg = Arc::new(cfg);
    let git: Arc<dyn GitRunner> = Arc::new(SystemGit);

    let setup_queue = Arc::new(WorkQueue::new(
        "setup",
        QUEUE_CAPACITY,
        cfg.watch.max_retries(),
    ));
    let cleanup_queue = Arc::new(WorkQueue::new(
        "cleanup",
        QUEUE_CAPACITY,
        CLEANUP_MAX_ATTEMPTS,
    ));

    let setup_rec = Arc::new(SetupReconciler::new(cfg.clone(), git.clone()));
    let cleanup_rec = Arc::new(CleanupReconciler::new(cfg.clone(), git.clone()));

    let setup_dispatcher = Dispatcher::new(
        "setup",
        setup_queue.clone(),
        setup_rec.clone(),
        cfg.watch.concurrency(),
    );
    // Serial on purpose: parallel worktree removals race inside one clone.
    let cleanup_dispatcher = Dispatcher::new("cleanup", cleanup_queue.clone(), cleanup_rec.clone(), 1);

    let state_dir = config::state_dir();
    let mut seen = state::load_seen(&state_dir);
    let mut current = cfg;

    tracing::info!(
        poll_interval = ?current.poll_interval(),
        dispatch_interval = ?current.watch.dispatch_interval(),
        cleanup_interval = ?current.watch.cleanup_interval(),
        concurrency = current.watch.concurrency(),
        max_retries = current.watch.max_retries(),
        "watch daemon started"
    );

    let mut poll_ticker = tokio::time::interval(current.poll_interval());
    let mut dispatch_ticker = tokio::time::interval(current.watch.dispatch_interval());
    let mut cleanup_ticker = tokio::time::interval(current.watch.cleanup_interval());
    let mut rotate_ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
    for ticker in [
        &mut poll_ticker,
        &mut dispatch_ticker,
        &mut cleanup_ticker,
        &mut rotate_ticker,
    ] {
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Consume the immediate first tick so each ticker fires one full
        // interval from now.
        ticker.tick().await;
    }

    // Initial poll before the first ticker interval elapses.
    poll_once(&cancel, &current, &mut seen, &setup_queue, &setup_rec).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("watch daemon stopping");
                let _ = std::fs::remove_file(&pid_path);
                return Ok(());
            }

            _ = rotate_ticker.tick() => {
                rotate_log_if_needed();
            }

            _ = poll_ticker.tick() => {
                if let Some(new_cfg) = reload_config(setup_rec.as_ref(), cleanup_rec.as_ref()) {
                    if new_cfg.poll_interval() != current.poll_interval() {
                        tracing::info!(
                            old = ?current.poll_interval(),
                            new = ?new_cfg.poll_interval(),
                            "poll interval changed"
                        );
                        poll_ticker = tokio::time::interval_at(
                            tokio::time::Instant::now() + new_cfg.poll_interval(),
                            new_cfg.poll_interval(),
                        );
                        poll_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    }
                    current = new_cfg;
                }
                poll_once(&cancel, &current, &mut seen, &setup_queue, &setup_rec).await;
            }

            _ = dispatch_ticker.tick() => {
                let budget = current.watch.dispatch_interval();
                setup_dispatcher.run_once(&cancel, budget).await;
                cleanup_dispatcher.run_once(&cancel, budget).await;
            }

            _ = cleanup_ticker.tick() => {
                scan_merged_prs(
                    &cancel,
                    &current,
                    git.as_ref(),
                    &cleanup_queue,
                    current.watch.cleanup_after_days(),
                ).await;
            }
        }
    }
}

/// Writes our pid, refusing if a live daemon already holds the file.
///
/// `start` records the spawned child's pid before the child gets here, so
/// a pid file naming this very process is ours, not a conflict.
fn acquire_pid_file() -> Result<PathBuf, DaemonError> {
    let path = pid_file();
    let own = std::process::id() as i32;
    if let Some(pid) = running_pid()
        && pid != own
    {
        return Err(DaemonError::AlreadyRunning(pid));
    }
    std::fs::write(&path, own.to_string())?;
    Ok(path)
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (Ok(mut term), Ok(mut int)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            tracing::error!("failed to install signal handlers");
            return;
        };

        tokio::select! {
            _ = term.recv() => tracing::info!("received SIGTERM"),
            _ = int.recv() => tracing::info!("received SIGINT"),
        }
        cancel.cancel();
    });
}

/// Re-reads the config file. Returns the new config on success; a failed
/// reload keeps the current one.
fn reload_config(setup: &impl Reconcile, cleanup: &impl Reconcile) -> Option<Arc<Config>> {
    match Config::load() {
        Ok(cfg) => {
            let cfg = Arc::new(cfg);
            setup.set_config(cfg.clone());
            cleanup.set_config(cfg.clone());
            Some(cfg)
        }
        Err(e) => {
            tracing::warn!(error = %e, "config reload failed; keeping current config");
            None
        }
    }
}

/// One poll pass over every configured repo.
async fn poll_once(
    cancel: &CancellationToken,
    cfg: &Config,
    seen: &mut HashSet<String>,
    setup_queue: &WorkQueue,
    setup_rec: &SetupReconciler,
) {
    let client = match GitHubClient::from_gh_cli().await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "poll skipped: GitHub client unavailable");
            return;
        }
    };

    let mut observed = 0usize;

    for repo in cfg.repo_names() {
        let full_repo = cfg.repo_full_name(repo);
        let reviews = tokio::select! {
            _ = cancel.cancelled() => return,
            res = client.review_requests(Some(full_repo)) => res,
        };
        let reviews = match reviews {
            Ok(reviews) => reviews,
            Err(e) => {
                tracing::warn!(repo, error = %e, "fetching review requests failed");
                continue;
            }
        };
        observed += reviews.len();

        for pr in reviews {
            let seen_key = pr.number.0.to_string();
            if seen.contains(&seen_key) {
                continue;
            }

            tracing::info!(
                repo,
                pr = %pr.number,
                title = %pr.title,
                author = %pr.author,
                "new PR review request"
            );
            if let Err(e) = notify::pr_review(pr.number, &pr.title, &pr.author, &pr.repo_name).await
            {
                tracing::debug!(pr = %pr.number, error = %e, "review notification failed");
            }

            if cfg.is_author(&pr.author) {
                let key = PrKey::new(repo, pr.number).to_string();
                setup_rec.store_pr_data(&key, pr.clone());
                match setup_queue.enqueue(&key, QueueOptions { priority: SETUP_PRIORITY }) {
                    Ok(()) => tracing::info!(key, author = %pr.author, "queued PR for setup"),
                    Err(e) => tracing::error!(key, error = %e, "failed to queue PR for setup"),
                }
            }

            seen.insert(seen_key);
        }
    }

    if let Err(e) = state::save_checkpoint(&config::state_dir(), seen, observed) {
        tracing::warn!(error = %e, "failed to write poll checkpoint");
    }
}

/// Rotates `watch.log` to `watch.log.1` once it exceeds the size cap and
/// re-binds stdout/stderr to the fresh file.
fn rotate_log_if_needed() {
    let path = log_file();
    if !needs_rotation(&path) {
        return;
    }

    let backup = path.with_extension("log.1");
    let _ = std::fs::remove_file(&backup);
    if let Err(e) = std::fs::rename(&path, &backup) {
        tracing::warn!(error = %e, "log rotation: rename failed");
        return;
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => {
            let fd = file.as_raw_fd();
            // The daemon's stdout/stderr point at the old (now renamed)
            // file; re-point them at the fresh one.
            unsafe {
                libc::dup2(fd, libc::STDOUT_FILENO);
                libc::dup2(fd, libc::STDERR_FILENO);
            }
            tracing::info!("log rotated (previous log saved as watch.log.1)");
        }
        Err(e) => {
            tracing::warn!(error = %e, "log rotation: reopen failed");
        }
    }
}

fn needs_rotation(path: &std::path::Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() >= MAX_LOG_SIZE).unwrap_or(false)
}
