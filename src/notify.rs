//! Fire-and-forget desktop notifications via osascript.
//!
//! Failures are the caller's to log; nothing here retries.

use std::path::Path;

use crate::types::PrNumber;

async fn send(title: &str, message: &str, subtitle: &str) -> std::io::Result<()> {
    let mut script = format!("display notification {message:?} with title {title:?}");
    if !subtitle.is_empty() {
        script.push_str(&format!(" subtitle {subtitle:?}"));
    }

    let status = tokio::process::Command::new("osascript")
        .arg("-e")
        .arg(script)
        .status()
        .await?;

    if !status.success() {
        return Err(std::io::Error::other(format!(
            "osascript exited with {status}"
        )));
    }
    Ok(())
}

/// A new PR review request arrived.
pub async fn pr_review(
    number: PrNumber,
    title: &str,
    author: &str,
    repo: &str,
) -> std::io::Result<()> {
    send(
        "New PR Review Request",
        &format!("PR {number}: {title}"),
        &format!("by {author} in {repo}"),
    )
    .await
}

/// A review worktree is ready to use.
pub async fn worktree_ready(number: PrNumber, worktree_path: &Path) -> std::io::Result<()> {
    send(
        "Worktree Ready",
        &format!("PR {number} worktree created"),
        &worktree_path.display().to_string(),
    )
    .await
}

/// A reviewed PR was merged; its worktree is now removable.
pub async fn pr_merged(number: PrNumber, title: &str) -> std::io::Result<()> {
    send(
        "PR Merged",
        &format!("PR {number}: {title}"),
        "Worktree can be cleaned up",
    )
    .await
}

/// The cleanup scan found worktrees ready for removal.
pub async fn stale_worktrees(count: usize) -> std::io::Result<()> {
    send(
        "Stale Worktrees Found",
        &format!("{count} worktrees can be cleaned up"),
        "",
    )
    .await
}
