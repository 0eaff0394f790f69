//! Octocrab client wrapper with the daemon's capability set.
//!
//! Review-request discovery uses the GraphQL search endpoint (the REST
//! search API cannot express "review-requested or re-review required" in
//! one pass); PR details, state, and files are REST. Authentication reuses
//! the token the `gh` CLI holds, so the daemon needs no credentials of its
//! own.

use octocrab::Octocrab;
use serde::Deserialize;

use super::error::GitHubApiError;
use super::{PrDetails, PrState, ReviewRequest};
use crate::types::PrNumber;

/// GraphQL query for review requests: PRs where the current user is a
/// requested reviewer, plus PRs the user reviewed where another review is
/// required.
const REVIEW_REQUESTS_QUERY: &str = r#"
query($q1: String!, $q2: String!) {
    requested: search(query: $q1, type: ISSUE, first: 50) {
        nodes {
            ... on PullRequest {
                number
                title
                author { login }
                repository { name nameWithOwner }
                createdAt
                url
            }
        }
    }
    rereview: search(query: $q2, type: ISSUE, first: 50) {
        nodes {
            ... on PullRequest {
                number
                title
                author { login }
                repository { name nameWithOwner }
                createdAt
                url
            }
        }
    }
}
"#;

#[derive(Debug, Deserialize)]
struct DualSearchResponse {
    requested: SearchNodes,
    rereview: SearchNodes,
}

#[derive(Debug, Deserialize)]
struct SearchNodes {
    nodes: Vec<PrSearchNode>,
}

/// A search node. Non-PR nodes deserialize as all-default (number 0) and
/// are skipped.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PrSearchNode {
    number: u64,
    title: String,
    author: Option<NodeAuthor>,
    repository: Option<NodeRepo>,
    created_at: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct NodeAuthor {
    login: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeRepo {
    name: String,
    name_with_owner: String,
}

/// A GitHub API client carrying the daemon's capability set.
#[derive(Clone)]
pub struct GitHubClient {
    inner: Octocrab,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient").finish_non_exhaustive()
    }
}

impl GitHubClient {
    /// Wraps a pre-configured octocrab instance.
    pub fn new(inner: Octocrab) -> Self {
        Self { inner }
    }

    /// Creates a client from a personal token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, GitHubApiError> {
        let inner = Octocrab::builder()
            .personal_token(token.into())
            .build()
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(Self::new(inner))
    }

    /// Creates a client using the token from `gh auth token`.
    pub async fn from_gh_cli() -> Result<Self, GitHubApiError> {
        let output = tokio::process::Command::new("gh")
            .args(["auth", "token"])
            .output()
            .await
            .map_err(|e| {
                GitHubApiError::permanent_without_source(format!(
                    "running gh auth token: {e} (is the gh CLI installed?)"
                ))
            })?;

        if !output.status.success() {
            return Err(GitHubApiError::permanent_without_source(
                "gh auth token failed (is the gh CLI authenticated?)",
            ));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Self::from_token(token)
    }

    /// The authenticated user's login.
    pub async fn current_user(&self) -> Result<String, GitHubApiError> {
        let user = self
            .inner
            .current()
            .user()
            .await
            .map_err(GitHubApiError::from_octocrab)?;
        Ok(user.login)
    }

    /// Open PRs where the current user's review is wanted, merged across
    /// the requested-reviewer and re-review searches and de-duplicated by
    /// PR number.
    pub async fn review_requests(
        &self,
        repo_filter: Option<&str>,
    ) -> Result<Vec<ReviewRequest>, GitHubApiError> {
        let clause = repo_clause(repo_filter);
        let q1 = format!("is:pr is:open review-requested:@me{clause}");
        let q2 = format!("is:pr is:open reviewed-by:@me review:required{clause}");

        let response: DualSearchResponse = self
            .inner
            .graphql(&serde_json::json!({
                "query": REVIEW_REQUESTS_QUERY,
                "variables": { "q1": q1, "q2": q2 },
            }))
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        Ok(merge_review_nodes([
            response.requested.nodes,
            response.rereview.nodes,
        ]))
    }

    /// Details for one PR. `None` when the PR does not exist.
    pub async fn pr_details(
        &self,
        full_repo: &str,
        number: PrNumber,
    ) -> Result<Option<PrDetails>, GitHubApiError> {
        let (owner, repo) = split_repo(full_repo);
        match self.inner.pulls(owner, repo).get(number.0).await {
            Ok(pull) => Ok(Some(details_from_pull(number, &pull))),
            Err(e) => absorb_not_found(e),
        }
    }

    /// State of one PR. `None` when the PR does not exist.
    pub async fn pr_state(
        &self,
        full_repo: &str,
        number: PrNumber,
    ) -> Result<Option<PrState>, GitHubApiError> {
        let (owner, repo) = split_repo(full_repo);
        match self.inner.pulls(owner, repo).get(number.0).await {
            Ok(pull) => Ok(Some(state_of_pull(&pull))),
            Err(e) => absorb_not_found(e),
        }
    }

    /// Changed file paths of one PR, across all pages. Empty when the PR
    /// does not exist.
    pub async fn pr_files(
        &self,
        full_repo: &str,
        number: PrNumber,
    ) -> Result<Vec<String>, GitHubApiError> {
        let (owner, repo) = split_repo(full_repo);
        let page = match self.inner.pulls(owner, repo).list_files(number.0).await {
            Ok(page) => page,
            Err(e) => {
                return absorb_not_found(e).map(|_: Option<()>| Vec::new());
            }
        };

        let files = self
            .inner
            .all_pages(page)
            .await
            .map_err(GitHubApiError::from_octocrab)?;

        Ok(files.into_iter().map(|f| f.filename).collect())
    }
}

/// Maps a 404 to `Ok(None)`; everything else stays an error.
fn absorb_not_found<T>(err: octocrab::Error) -> Result<Option<T>, GitHubApiError> {
    let err = GitHubApiError::from_octocrab(err);
    if err.is_not_found() { Ok(None) } else { Err(err) }
}

fn state_of_pull(pull: &octocrab::models::pulls::PullRequest) -> PrState {
    if pull.merged_at.is_some() {
        PrState::Merged
    } else if pull.state == Some(octocrab::models::IssueState::Closed) {
        PrState::Closed
    } else {
        PrState::Open
    }
}

fn details_from_pull(number: PrNumber, pull: &octocrab::models::pulls::PullRequest) -> PrDetails {
    PrDetails {
        number,
        title: pull.title.clone().unwrap_or_default(),
        author: pull
            .user
            .as_ref()
            .map(|u| u.login.clone())
            .unwrap_or_default(),
        state: state_of_pull(pull),
        head_ref: pull.head.ref_field.clone(),
        base_ref: pull.base.ref_field.clone(),
        body: pull.body.clone().unwrap_or_default(),
        created_at: pull
            .created_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
        url: pull
            .html_url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_default(),
        is_fork: pull
            .head
            .repo
            .as_ref()
            .map(|r| r.fork.unwrap_or(false))
            .unwrap_or(false),
    }
}

fn repo_clause(repo_filter: Option<&str>) -> String {
    repo_filter
        .map(|r| format!(" repo:{r}"))
        .unwrap_or_default()
}

fn split_repo(full_repo: &str) -> (&str, &str) {
    full_repo.split_once('/').unwrap_or((full_repo, ""))
}

/// Merges search node lists, skipping non-PR nodes and de-duplicating by
/// PR number (first occurrence wins).
fn merge_review_nodes(lists: [Vec<PrSearchNode>; 2]) -> Vec<ReviewRequest> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();

    for node in lists.into_iter().flatten() {
        if node.number == 0 || !seen.insert(node.number) {
            continue;
        }
        let (repo_name, repo_full_name) = node
            .repository
            .map(|r| (r.name, r.name_with_owner))
            .unwrap_or_default();
        merged.push(ReviewRequest {
            number: PrNumber(node.number),
            title: node.title,
            author: node.author.map(|a| a.login).unwrap_or_default(),
            repo_name,
            repo_full_name,
            created_at: node.created_at,
            url: node.url,
        });
    }

    merged
}
