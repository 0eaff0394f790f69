//! PR review context injection.
//!
//! Each review worktree gets a generated `CLAUDE.local.md` describing the
//! PR: identity table, description, changed files, and a fixed review
//! brief. Writing to `CLAUDE.local.md` rather than `CLAUDE.md` keeps the
//! repo's own context file untouched, so nothing here can be committed by
//! accident.

use std::path::Path;

use minijinja::Environment;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::github::{GitHubApiError, GitHubClient, PrDetails};
use crate::types::PrNumber;

/// File written into the worktree root.
pub const CONTEXT_FILE: &str = "CLAUDE.local.md";

const CONTEXT_TEMPLATE: &str = r#"# PR Review: #{{ number }} — {{ title }}

## PR Info

| Field | Value |
|-------|-------|
| **PR** | [#{{ number }}]({{ url }}) |
| **Author** | {{ author }} |
| **Branch** | `{{ head_branch }}` → `{{ base_branch }}` |
{%- if is_fork %}
| **Fork** | Yes |
{%- endif %}

## Description

{% if body %}{{ body }}{% else %}_No description provided._{% endif %}

## Changed Files

{% for file in changed_files %}- `{{ file }}`
{% endfor %}
## Review Instructions

You are reviewing PR #{{ number }}. Focus on:

1. **Correctness** — Does the code do what the PR description says?
2. **Security** — Any injection, auth bypass, or data exposure risks?
3. **Tests** — Are changes adequately tested?
4. **Style** — Does it follow existing patterns in the codebase?

Start by reading the changed files listed above, then provide your review.
"#;

/// Errors from context injection.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("rendering context template: {0}")]
    Render(#[from] minijinja::Error),

    #[error("writing context file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Api(#[from] GitHubApiError),

    #[error("PR {0} not found")]
    PrNotFound(PrNumber),

    #[error("context injection cancelled")]
    Cancelled,
}

/// All data the template needs.
#[derive(Debug, Clone, Serialize)]
pub struct PrReviewContext {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub url: String,
    pub head_branch: String,
    pub base_branch: String,
    pub is_fork: bool,
    pub body: String,
    pub changed_files: Vec<String>,
}

impl PrReviewContext {
    pub fn from_details(details: &PrDetails, changed_files: Vec<String>) -> Self {
        PrReviewContext {
            number: details.number.0,
            title: details.title.clone(),
            author: details.author.clone(),
            url: details.url.clone(),
            head_branch: details.head_ref.clone(),
            base_branch: details.base_ref.clone(),
            is_fork: details.is_fork,
            body: details.body.clone(),
            changed_files,
        }
    }
}

/// Renders the context document to a string.
pub fn render(ctx: &PrReviewContext) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("claude-local", CONTEXT_TEMPLATE)?;
    env.get_template("claude-local")?.render(ctx)
}

/// Renders and writes `CLAUDE.local.md` into the worktree root.
///
/// The write goes through a temp file and rename, so a concurrent reader
/// never sees a partial document. The file is `0644` regardless of umask.
pub fn write_context(worktree: &Path, ctx: &PrReviewContext) -> Result<(), ContextError> {
    use std::os::unix::fs::PermissionsExt;

    let rendered = render(ctx)?;
    let path = worktree.join(CONTEXT_FILE);
    let tmp = worktree.join(format!("{CONTEXT_FILE}.tmp"));
    std::fs::write(&tmp, rendered)?;
    std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644))?;
    std::fs::rename(&tmp, &path)?;
    tracing::debug!(path = %path.display(), "wrote PR review context");
    Ok(())
}

/// Fetches PR details and changed files, then writes the context document
/// into the worktree.
pub async fn inject(
    cancel: &CancellationToken,
    client: &GitHubClient,
    worktree: &Path,
    full_repo: &str,
    number: PrNumber,
) -> Result<(), ContextError> {
    let details = tokio::select! {
        _ = cancel.cancelled() => return Err(ContextError::Cancelled),
        res = client.pr_details(full_repo, number) => res?,
    };
    let details = details.ok_or(ContextError::PrNotFound(number))?;

    let files = tokio::select! {
        _ = cancel.cancelled() => return Err(ContextError::Cancelled),
        res = client.pr_files(full_repo, number) => res?,
    };

    write_context(worktree, &PrReviewContext::from_details(&details, files))
}
