//! Stale `index.lock` garbage collection.
//!
//! Git leaves `index.lock` behind when a process holding it dies. Before
//! listing or mutating worktrees, every lock whose recorded pid is no
//! longer running is removed.

use std::path::Path;

use crate::config::Config;

/// Removes stale `index.lock` files from a repo's clone and its worktrees.
///
/// A lock is stale when the first integer in it names a process that no
/// longer exists. Locks that cannot be read, or whose pid is alive, are
/// left alone.
pub fn clean_stale_locks(cfg: &Config, repo: &str) {
    let Some(base) = cfg.repo_base_path(repo) else {
        return;
    };

    let git_dir = base.join(repo).join(".git");
    if !git_dir.exists() {
        return;
    }

    if let Ok(entries) = std::fs::read_dir(git_dir.join("worktrees")) {
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            remove_stale_lock(&entry.path().join("index.lock"), &name);
        }
    }

    // The primary clone's own index.lock can go stale too.
    remove_stale_lock(&git_dir.join("index.lock"), repo);
}

/// Cleans stale locks across all configured repos.
pub fn clean_all_stale_locks(cfg: &Config) {
    for repo in cfg.repo_names() {
        clean_stale_locks(cfg, repo);
    }
}

fn remove_stale_lock(lock_file: &Path, name: &str) {
    let Ok(data) = std::fs::read_to_string(lock_file) else {
        return;
    };

    // Git writes host info alongside the pid; the first integer field is
    // the pid.
    for field in data.split_whitespace() {
        let Ok(pid) = field.parse::<i32>() else {
            continue;
        };
        if pid_alive(pid) {
            return;
        }
        break;
    }

    tracing::warn!(worktree = name, path = %lock_file.display(), "removing stale index.lock");
    let _ = std::fs::remove_file(lock_file);
}

fn pid_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}
