//! Setup reconciler: prepares a review worktree for a PR.
//!
//! Three idempotent steps per key: ensure the worktree exists, ensure the
//! context document is injected, cache display metadata. Only the first
//! step can fail the reconciliation; the others degrade to warnings, so a
//! usable worktree is never torn back down over a missing context file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use super::Reconcile;
use crate::config::{self, Config};
use crate::context::{self, ContextError};
use crate::git::{GitResult, GitRunner, lock_git};
use crate::github::{GitHubClient, ReviewRequest};
use crate::queue::ReconcileError;
use crate::types::{PrKey, PrNumber};
use crate::{cache, notify};

pub struct SetupReconciler {
    cfg: RwLock<Arc<Config>>,
    git: Arc<dyn GitRunner>,
    pr_data: RwLock<HashMap<String, ReviewRequest>>,
}

impl SetupReconciler {
    pub fn new(cfg: Arc<Config>, git: Arc<dyn GitRunner>) -> Self {
        SetupReconciler {
            cfg: RwLock::new(cfg),
            git,
            pr_data: RwLock::new(HashMap::new()),
        }
    }

    /// Buffers the poller's PR payload until reconciliation consumes it.
    /// Re-observation overwrites.
    pub fn store_pr_data(&self, key: &str, pr: ReviewRequest) {
        self.write_pr_data().insert(key.to_string(), pr);
    }

    fn buffered(&self, key: &str) -> Option<ReviewRequest> {
        self.pr_data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn write_pr_data(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ReviewRequest>> {
        self.pr_data.write().unwrap_or_else(|e| e.into_inner())
    }

    fn config(&self) -> Arc<Config> {
        self.cfg.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Step 1: fetch the PR head into a local `pr-<n>` branch and add the
    /// worktree. Skips entirely when the worktree directory already
    /// exists; re-checks under the git mutex because a parallel worker may
    /// have created it while we waited.
    fn ensure_worktree(
        &self,
        origin: &Path,
        worktree_path: &Path,
        worktree_name: &str,
        number: PrNumber,
    ) -> GitResult<()> {
        if worktree_path.exists() {
            return Ok(());
        }

        let _guard = lock_git();

        if worktree_path.exists() {
            return Ok(());
        }

        let n = number.0;
        self.git
            .run(origin, &["fetch", "origin", &format!("+pull/{n}/head:pr-{n}")])?;

        let path_arg = worktree_path.display().to_string();
        self.git
            .run(origin, &["worktree", "add", &path_arg, &format!("pr-{n}")])?;

        // git sometimes leaves the fresh worktree's index.lock behind.
        let _ = std::fs::remove_file(
            origin
                .join(".git/worktrees")
                .join(worktree_name)
                .join("index.lock"),
        );

        Ok(())
    }

    /// Step 2: write `CLAUDE.local.md` unless it already exists.
    async fn ensure_context_injected(
        &self,
        cancel: &CancellationToken,
        worktree_path: &Path,
        full_repo: &str,
        number: PrNumber,
    ) -> Result<(), ContextError> {
        if worktree_path.join(context::CONTEXT_FILE).exists() {
            return Ok(());
        }
        let client = GitHubClient::from_gh_cli().await?;
        context::inject(cancel, &client, worktree_path, full_repo, number).await
    }
}

impl Reconcile for SetupReconciler {
    async fn reconcile(
        &self,
        cancel: CancellationToken,
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

        let Some(pr) = self.buffered(key) else {
            return Err(ReconcileError::non_retriable(
                format!("no PR payload buffered for key {key:?}"),
                "missing PR metadata",
            ));
        };

        let worktree_name = format!("{}-pr-{}", pr_key.repo, pr_key.number.0);
        let worktree_path = base.join(&worktree_name);
        let origin = base.join(&pr_key.repo);
        let full_repo = cfg.repo_full_name(&pr_key.repo).to_string();

        self.ensure_worktree(&origin, &worktree_path, &worktree_name, pr_key.number)?;

        if let Err(err) = self
            .ensure_context_injected(&cancel, &worktree_path, &full_repo, pr_key.number)
            .await
        {
            tracing::warn!(key, error = %err, "context injection failed; worktree remains usable");
        }

        if let Err(err) = cache::set(
            &config::state_dir(),
            &pr_key.repo,
            pr_key.number,
            &pr.title,
            &pr.author,
        ) {
            tracing::warn!(key, error = %err, "display cache write failed");
        }

        if let Err(err) = notify::worktree_ready(pr_key.number, &worktree_path).await {
            tracing::debug!(key, error = %err, "worktree-ready notification failed");
        }

        tracing::info!(
            key,
            title = %pr.title,
            path = %worktree_path.display(),
            "setup complete"
        );
        Ok(())
    }

    fn set_config(&self, cfg: Arc<Config>) {
        *self.cfg.write().unwrap_or_else(|e| e.into_inner()) = cfg;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use crate::config::RepoConfig;
    use crate::git::SystemGit;
    use crate::types::PrNumber;

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

    fn reconciler(base: &Path) -> SetupReconciler {
        SetupReconciler::new(test_config(base), Arc::new(SystemGit))
    }

    fn review_request(number: u64) -> ReviewRequest {
        ReviewRequest {
            number: PrNumber(number),
            title: "Test PR".to_string(),
            author: "alice".to_string(),
            repo_name: "app".to_string(),
            repo_full_name: "acme/app".to_string(),
            created_at: "2026-07-01T10:00:00Z".to_string(),
            url: format!("https://github.com/acme/app/pull/{number}"),
        }
    }

    #[tokio::test]
    async fn invalid_key_is_terminal() {
        let rec = reconciler(Path::new("/tmp/test"));
        let err = rec
            .reconcile(CancellationToken::new(), "badkey")
            .await
            .unwrap_err();
        assert_eq!(err.non_retriable_details(), Some("invalid key format"));
    }

    #[tokio::test]
    async fn unknown_repo_is_terminal() {
        let rec = reconciler(Path::new("/tmp/test"));
        // Payload present, so the failure is specifically the repo lookup.
        rec.store_pr_data("nonexistent:123", review_request(123));

        let err = rec
            .reconcile(CancellationToken::new(), "nonexistent:123")
            .await
            .unwrap_err();
        assert_eq!(err.non_retriable_details(), Some("repo not configured"));
    }

    #[tokio::test]
    async fn missing_payload_is_terminal() {
        let rec = reconciler(Path::new("/tmp/test"));
        let err = rec
            .reconcile(CancellationToken::new(), "app:123")
            .await
            .unwrap_err();
        assert_eq!(err.non_retriable_details(), Some("missing PR metadata"));
    }

    #[test]
    fn store_overwrites_on_reobservation() {
        let rec = reconciler(Path::new("/tmp/test"));
        rec.store_pr_data("app:1", review_request(1));
        let mut updated = review_request(1);
        updated.title = "Updated title".to_string();
        rec.store_pr_data("app:1", updated);

        assert_eq!(rec.buffered("app:1").unwrap().title, "Updated title");
    }

    /// Builds an upstream repo with a `refs/pull/42/head` ref and a local
    /// clone of it under `<base>/app`, the layout the daemon operates on.
    fn create_origin_with_pr(tmp: &Path) -> PathBuf {
        let git = SystemGit;

        let upstream = tmp.join("upstream.git");
        std::fs::create_dir_all(&upstream).unwrap();
        git.run(&upstream, &["init", "--bare"]).unwrap();

        let work = tmp.join("work");
        std::fs::create_dir_all(&work).unwrap();
        let id = [
            "-c",
            "user.email=test@test.invalid",
            "-c",
            "user.name=Test",
        ];
        git.run(&work, &["init"]).unwrap();
        std::fs::write(work.join("README.md"), "# Test").unwrap();
        git.run(&work, &["add", "."]).unwrap();
        git.run(&work, &[&id[..], &["commit", "-m", "initial"][..]].concat())
            .unwrap();
        let upstream_arg = upstream.display().to_string();
        git.run(&work, &["remote", "add", "origin", &upstream_arg])
            .unwrap();
        git.run(&work, &["push", "-u", "origin", "HEAD:main"]).unwrap();
        git.run(&upstream, &["symbolic-ref", "HEAD", "refs/heads/main"])
            .unwrap();

        // Simulate the hosting service's PR ref.
        std::fs::write(work.join("feature.txt"), "change").unwrap();
        git.run(&work, &["add", "."]).unwrap();
        git.run(&work, &[&id[..], &["commit", "-m", "pr change"][..]].concat())
            .unwrap();
        git.run(&work, &["push", "origin", "HEAD:refs/pull/42/head"])
            .unwrap();

        let base = tmp.join("acme");
        std::fs::create_dir_all(&base).unwrap();
        let clone_arg = base.join("app").display().to_string();
        git.run(tmp, &["clone", &upstream_arg, &clone_arg]).unwrap();

        base
    }

    #[test]
    fn ensure_worktree_fetches_and_adds() {
        let tmp = tempfile::tempdir().unwrap();
        let base = create_origin_with_pr(tmp.path());
        let rec = reconciler(&base);

        let origin = base.join("app");
        let worktree = base.join("app-pr-42");
        rec.ensure_worktree(&origin, &worktree, "app-pr-42", PrNumber(42))
            .unwrap();

        assert!(worktree.exists());
        assert!(worktree.join("feature.txt").exists());

        let branch = SystemGit
            .run(&worktree, &["rev-parse", "--abbrev-ref", "HEAD"])
            .unwrap();
        assert_eq!(branch, "pr-42");
    }

    #[test]
    fn ensure_worktree_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let base = create_origin_with_pr(tmp.path());
        let rec = reconciler(&base);

        let origin = base.join("app");
        let worktree = base.join("app-pr-42");
        rec.ensure_worktree(&origin, &worktree, "app-pr-42", PrNumber(42))
            .unwrap();
        // Second run sees the directory and does nothing.
        rec.ensure_worktree(&origin, &worktree, "app-pr-42", PrNumber(42))
            .unwrap();
        assert!(worktree.exists());
    }

    #[test]
    fn ensure_worktree_failure_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let base = create_origin_with_pr(tmp.path());
        let rec = reconciler(&base);

        let origin = base.join("app");
        let worktree = base.join("app-pr-99");
        // No refs/pull/99/head upstream: the fetch fails.
        let err = rec
            .ensure_worktree(&origin, &worktree, "app-pr-99", PrNumber(99))
            .unwrap_err();
        assert!(err.to_string().contains("git fetch"), "got: {err}");
        assert!(!worktree.exists());
    }
}
