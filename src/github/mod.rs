//! Typed wrapper over the GitHub API.
//!
//! The daemon needs a narrow capability set: review-request search and PR
//! details/state/files. Everything goes through octocrab, authenticated
//! with the token the `gh` CLI already holds.

mod client;
mod error;

pub use client::GitHubClient;
pub use error::{GitHubApiError, GitHubErrorKind};

use serde::{Deserialize, Serialize};

use crate::types::PrNumber;

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl PrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrState::Open => "OPEN",
            PrState::Closed => "CLOSED",
            PrState::Merged => "MERGED",
        }
    }
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open PR where the current user's review is wanted.
///
/// This is the payload the poller buffers for the setup reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub number: PrNumber,
    pub title: String,
    pub author: String,
    pub repo_name: String,
    pub repo_full_name: String,
    pub created_at: String,
    pub url: String,
}

/// Full details of one PR, as needed for context injection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrDetails {
    pub number: PrNumber,
    pub title: String,
    pub author: String,
    pub state: PrState,
    pub head_ref: String,
    pub base_ref: String,
    pub body: String,
    pub created_at: String,
    pub url: String,
    pub is_fork: bool,
}
