//! Cleanup reconciler: removes worktrees of merged PRs.
//!
//! The scanner walks the worktree inventory on each cleanup tick, asks the
//! hosting service which PR-review worktrees belong to merged PRs, and
//! enqueues the aged ones. The reconciler itself only removes a worktree;
//! a missing path is success, so replays after a crash are no-ops.

use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use super::Reconcile;
use crate::config::{self, Config};
use crate::git::{GitResult, GitRunner, lock_git};
use crate::github::{GitHubClient, PrState};
use crate::queue::{QueueOptions, ReconcileError, WorkQueue};
use crate::types::PrKey;
use crate::worktree::{self, WorktreeKind};
use crate::{cache, notify};

pub struct CleanupReconciler {
    cfg: RwLock<Arc<Config>>,
    git: Arc<dyn GitRunner>,
}

impl CleanupReconciler {
    pub fn new(cfg: Arc<Config>, git: Arc<dyn GitRunner>) -> Self {
        CleanupReconciler {
            cfg: RwLock::new(cfg),
            git,
        }
    }

    fn config(&self) -> Arc<Config> {
        self.cfg.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Reconcile for CleanupReconciler {
    async fn reconcile(
        &self,
        _cancel: CancellationToken,
        key: &str,
    ) -> Result<(), ReconcileError> {
        let pr_key: PrKey = key
            .parse()
            .map_err(|e: crate::types::PrKeyError| {
                ReconcileError::non_retriable(e, "invalid key format")
            })?;

        let cfg = self.config();
        let Some(base) = cfg.repo_base_path(&pr_key.repo) else {
            return Err(ReconcileError::non_retriable(
                format!("unknown repo {:?}", pr_key.repo),
                "repo not configured",
            ));
        };

        let worktree_path = base.join(format!("{}-pr-{}", pr_key.repo, pr_key.number.0));
        let origin = base.join(&pr_key.repo);

        remove_worktree(self.git.as_ref(), &origin, &worktree_path)?;

        tracing::info!(key, path = %worktree_path.display(), "cleanup complete");
        Ok(())
    }

    fn set_config(&self, cfg: Arc<Config>) {
        *self.cfg.write().unwrap_or_else(|e| e.into_inner()) = cfg;
    }
}

/// Removes a worktree with `--force`, run from the primary clone. A
/// missing path is success.
fn remove_worktree(git: &dyn GitRunner, origin: &Path, worktree_path: &Path) -> GitResult<()> {
    if !worktree_path.exists() {
        return Ok(());
    }

    let _guard = lock_git();

    if !worktree_path.exists() {
        return Ok(());
    }

    let path_arg = worktree_path.display().to_string();
    git.run(origin, &["worktree", "remove", "--force", &path_arg])?;
    Ok(())
}

/// Finds worktrees whose PRs are merged and have aged past the threshold,
/// and queues them for removal.
///
/// Remote-API failures are absorbed; the next tick retries.
pub async fn scan_merged_prs(
    cancel: &CancellationToken,
    cfg: &Config,
    git: &dyn GitRunner,
    queue: &WorkQueue,
    cleanup_after_days: u32,
) {
    let worktrees = worktree::list_all(cfg, git);
    if worktrees.is_empty() {
        return;
    }

    let client = match GitHubClient::from_gh_cli().await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "cleanup scan: GitHub client unavailable");
            return;
        }
    };

    let state_dir = config::state_dir();
    let mut enqueued = 0usize;

    for wt in worktrees {
        let (WorktreeKind::PrReview, Some(number)) = (wt.kind, wt.pr_number) else {
            continue;
        };

        let full_repo = cfg.repo_full_name(&wt.repo);
        let state = tokio::select! {
            _ = cancel.cancelled() => return,
            res = client.pr_state(full_repo, number) => res,
        };
        match state {
            Ok(Some(PrState::Merged)) => {}
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(repo = %wt.repo, pr = %number, error = %e, "cleanup scan: state lookup failed");
                continue;
            }
        }

        // A worktree that cannot be dated is skipped.
        match worktree::age_days(git, &wt.path) {
            Ok(Some(age)) if age >= i64::from(cleanup_after_days) => {}
            _ => continue,
        }

        let key = PrKey::new(wt.repo.clone(), number).to_string();
        match queue.enqueue(&key, QueueOptions::default()) {
            Ok(()) => {
                enqueued += 1;
                let title = cache::get(&state_dir, &wt.repo, number)
                    .map(|meta| meta.title)
                    .unwrap_or_default();
                if let Err(e) = notify::pr_merged(number, &title).await {
                    tracing::debug!(key, error = %e, "pr-merged notification failed");
                }
                tracing::info!(key, age_days = cleanup_after_days, "queued worktree for cleanup");
            }
            Err(e) => {
                tracing::error!(key, error = %e, "failed to queue cleanup");
            }
        }
    }

    if enqueued > 0
        && let Err(e) = notify::stale_worktrees(enqueued).await
    {
        tracing::debug!(error = %e, "stale-worktrees notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::config::RepoConfig;
    use crate::git::SystemGit;

    fn test_config(base: &Path) -> Arc<Config> {
        Arc::new(Config {
            repos: BTreeMap::from([(
                "app".to_string(),
                RepoConfig {
                    full_name: "acme/app".to_string(),
                    base_path: base.to_path_buf(),
                },
            )]),
            ..Config::default()
        })
    }

    fn reconciler(base: &Path) -> CleanupReconciler {
        CleanupReconciler::new(test_config(base), Arc::new(SystemGit))
    }

    /// A clone at `<base>/app` with a worktree at `<base>/app-pr-19`.
    fn create_clone_with_worktree(base: &Path) {
        let git = SystemGit;

        let origin = base.join("app");
        std::fs::create_dir_all(&origin).unwrap();
        git.run(&origin, &["init"]).unwrap();
        std::fs::write(origin.join("README.md"), "# Test").unwrap();
        git.run(&origin, &["add", "."]).unwrap();
        git.run(
            &origin,
            &[
                "-c",
                "user.email=test@test.invalid",
                "-c",
                "user.name=Test",
                "commit",
                "-m",
                "initial",
            ],
        )
        .unwrap();

        let wt_arg = base.join("app-pr-19").display().to_string();
        git.run(&origin, &["worktree", "add", &wt_arg, "-b", "pr-19"])
            .unwrap();
    }

    #[tokio::test]
    async fn removes_existing_worktree() {
        let tmp = tempfile::tempdir().unwrap();
        create_clone_with_worktree(tmp.path());
        let worktree = tmp.path().join("app-pr-19");
        assert!(worktree.exists());

        let rec = reconciler(tmp.path());
        rec.reconcile(CancellationToken::new(), "app:19")
            .await
            .unwrap();

        assert!(!worktree.exists());
    }

    #[tokio::test]
    async fn missing_worktree_is_success() {
        let tmp = tempfile::tempdir().unwrap();
        create_clone_with_worktree(tmp.path());
        let rec = reconciler(tmp.path());

        // Remove once, then replay: both succeed.
        rec.reconcile(CancellationToken::new(), "app:19")
            .await
            .unwrap();
        rec.reconcile(CancellationToken::new(), "app:19")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_key_is_terminal() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = reconciler(tmp.path());
        let err = rec
            .reconcile(CancellationToken::new(), "badkey")
            .await
            .unwrap_err();
        assert_eq!(err.non_retriable_details(), Some("invalid key format"));
    }

    #[tokio::test]
    async fn unknown_repo_is_terminal() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = reconciler(tmp.path());
        let err = rec
            .reconcile(CancellationToken::new(), "nonexistent:7")
            .await
            .unwrap_err();
        assert_eq!(err.non_retriable_details(), Some("repo not configured"));
    }
}
