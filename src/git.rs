//! Narrow interface over git subprocess invocations.
//!
//! Every mutation of a clone (fetch, worktree add/remove) and every query
//! (worktree list, commit log) goes through [`GitRunner`], so tests can
//! substitute a recorded fake. The production impl shells out to `git`
//! with a clean environment for consistent behavior across machines.
//!
//! Git serialises mutations on `.git/index.lock`, so concurrent worktree
//! operations within one clone race. [`lock_git`] provides the
//! process-wide mutex reconcilers hold across each mutating invocation.

use std::path::Path;
use std::process::Command;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

/// Subprocess output captured into errors is truncated to this length.
const MAX_CAPTURED_OUTPUT: usize = 4096;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command exited non-zero.
    #[error("git command failed: {command}\n{output}")]
    CommandFailed { command: String, output: String },

    /// IO error spawning the subprocess.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

static GIT_MUTEX: Mutex<()> = Mutex::new(());

/// Acquires the process-wide version-control mutex.
///
/// Held across each fetch/worktree subprocess; the runner is synchronous,
/// so the guard never lives across an await point. A poisoned mutex is
/// recovered: the guarded state lives in git, not in memory.
pub fn lock_git() -> MutexGuard<'static, ()> {
    GIT_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
}

/// Runs git commands in a working directory.
pub trait GitRunner: Send + Sync {
    /// Runs `git <args>` with `cwd` as the working directory and returns
    /// trimmed stdout. Non-zero exit is an error carrying the combined
    /// output, truncated.
    fn run(&self, cwd: &Path, args: &[&str]) -> GitResult<String>;
}

/// The real git binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemGit;

impl GitRunner for SystemGit {
    fn run(&self, cwd: &Path, args: &[&str]) -> GitResult<String> {
        let output = Command::new("git")
            .current_dir(cwd)
            .args(args)
            // Ignore system and user git config (rerere, hooks, aliases)
            // so behavior is identical on every machine.
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                output: truncate(&combined),
            })
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_CAPTURED_OUTPUT {
        return s.trim_end().to_string();
    }
    let mut end = MAX_CAPTURED_OUTPUT;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [{} bytes truncated]", &s[..end], s.len() - end)
}
