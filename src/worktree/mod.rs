//! Worktree inventory, derived from git on every query.
//!
//! The version-control tool is the single source of truth for which
//! worktrees exist; nothing here keeps a registry. Each query lists the
//! worktrees of a configured repo's primary clone and classifies them by
//! directory-name suffix: `<repo>-pr-<n>` is a PR-review checkout, anything
//! else is feature work.

mod age;
mod lock;

pub use age::{age_days, last_activity};
pub use lock::{clean_all_stale_locks, clean_stale_locks};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::git::GitRunner;
use crate::types::PrNumber;

/// Classification of a worktree by its directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorktreeKind {
    PrReview,
    Feature,
}

/// A discovered git worktree.
#[derive(Debug, Clone, Serialize)]
pub struct Worktree {
    pub path: PathBuf,
    pub name: String,
    pub branch: String,
    pub kind: WorktreeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<PrNumber>,
    pub repo: String,
}

/// Classifies a worktree directory name.
///
/// Names ending in `-pr-<n>` with a positive `n` are PR-review checkouts;
/// everything else (including a zero suffix) is feature work.
pub fn classify(name: &str) -> (WorktreeKind, Option<PrNumber>) {
    if let Some((_, digits)) = name.rsplit_once("-pr-")
        && !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && let Ok(n) = digits.parse::<u64>()
        && n > 0
    {
        return (WorktreeKind::PrReview, Some(PrNumber(n)));
    }
    (WorktreeKind::Feature, None)
}

/// Lists all worktrees of one configured repo.
///
/// Returns empty when the repo is unconfigured, the primary clone has no
/// `.git` entry, or the listing subprocess fails (logged at debug; the
/// next scan retries).
pub fn list_for_repo(cfg: &Config, git: &dyn GitRunner, repo: &str) -> Vec<Worktree> {
    let Some(base) = cfg.repo_base_path(repo) else {
        return Vec::new();
    };

    let origin = base.join(repo);
    if !origin.join(".git").exists() {
        return Vec::new();
    }

    // Clear stale index locks before touching git.
    clean_stale_locks(cfg, repo);

    let out = match git.run(&origin, &["worktree", "list"]) {
        Ok(out) => out,
        Err(e) => {
            tracing::debug!(repo, error = %e, "git worktree list failed");
            return Vec::new();
        }
    };

    out.lines()
        .filter_map(|line| parse_list_line(line, &origin, repo))
        .collect()
}

/// Parses one `git worktree list` line: `<path> <sha> [<branch>]`.
fn parse_list_line(line: &str, origin: &Path, repo: &str) -> Option<Worktree> {
    let path = PathBuf::from(line.split_whitespace().next()?);

    // Skip the primary clone itself.
    if path == origin {
        return None;
    }

    let branch = line
        .find('[')
        .and_then(|start| {
            let rest = &line[start + 1..];
            rest.find(']').map(|end| rest[..end].to_string())
        })
        .unwrap_or_default();

    let name = path.file_name()?.to_string_lossy().into_owned();
    let (kind, pr_number) = classify(&name);

    Some(Worktree {
        path,
        name,
        branch,
        kind,
        pr_number,
        repo: repo.to_string(),
    })
}

/// Lists worktrees across all configured repos.
pub fn list_all(cfg: &Config, git: &dyn GitRunner) -> Vec<Worktree> {
    cfg.repo_names()
        .flat_map(|repo| list_for_repo(cfg, git, repo))
        .collect()
}

/// Worktree counts across repos.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub total: usize,
    pub pr_reviews: usize,
    pub features: usize,
    pub by_repo: BTreeMap<String, usize>,
}

/// Computes statistics across all configured repos.
pub fn stats(cfg: &Config, git: &dyn GitRunner) -> Stats {
    let mut stats = Stats::default();
    for wt in list_all(cfg, git) {
        stats.total += 1;
        match wt.kind {
            WorktreeKind::PrReview => stats.pr_reviews += 1,
            WorktreeKind::Feature => stats.features += 1,
        }
        *stats.by_repo.entry(wt.repo).or_default() += 1;
    }
    stats
}
