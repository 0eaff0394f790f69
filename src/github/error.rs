//! GitHub API error taxonomy.
//!
//! The distinction drives the workqueue's retry decision:
//!
//! - **Transient** errors (5xx, rate limits, network failures) are
//!   retriable with backoff.
//! - **Permanent** errors (most 4xx, auth failures) are terminal.
//! - **NotFound** (404 for an unknown PR) is not an error at all to most
//!   callers; the client surfaces it as an empty result.

use std::fmt;

use thiserror::Error;

/// The kind of GitHub API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// Safe to retry with backoff: 5xx, 429, rate-limited 403, network
    /// timeouts.
    Transient,

    /// Requires intervention: auth failures, validation errors, any other
    /// 4xx.
    Permanent,

    /// The PR (or other resource) does not exist. Callers treat this as an
    /// empty result, not a failure.
    NotFound,
}

impl GitHubErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A GitHub API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    pub fn is_not_found(&self) -> bool {
        self.kind == GitHubErrorKind::NotFound
    }

    /// Creates a transient error without an octocrab source.
    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a permanent error without an octocrab source.
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes an octocrab error by status code and message patterns.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = extract_status_code(&err);
        let message = err.to_string();
        let kind = categorize(status_code, &message);

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }
}

/// Maps a status code plus message to an error kind.
fn categorize(status_code: Option<u16>, message: &str) -> GitHubErrorKind {
    match status_code {
        Some(404) => GitHubErrorKind::NotFound,
        Some(429) => GitHubErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => GitHubErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
        Some(_) => GitHubErrorKind::Permanent,
        None => {
            if is_network_error(message) {
                GitHubErrorKind::Transient
            } else {
                GitHubErrorKind::Permanent
            }
        }
    }
}

/// Extracts the HTTP status code from an octocrab error, if present.
///
/// octocrab does not expose a stable status-code accessor across all of
/// its error variants, so this falls back to well-established message
/// patterns. A miss returns `None`, which categorizes conservatively.
fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
    if let octocrab::Error::GitHub { source, .. } = err {
        return Some(source.status_code.as_u16());
    }

    let err_str = err.to_string();
    if let Some(idx) = err_str.find("status: ") {
        let rest = &err_str[idx + 8..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if let Ok(code) = rest[..end].parse() {
            return Some(code);
        }
    }

    for code in [404u16, 409, 422, 403, 401, 429, 500, 502, 503] {
        if err_str.contains(&code.to_string()) {
            return Some(code);
        }
    }

    None
}

fn is_rate_limit_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("rate limit")
        || message.contains("api rate")
        || message.contains("secondary rate")
        || message.contains("abuse detection")
}

fn is_network_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("timeout")
        || message.contains("connection")
        || message.contains("network")
        || message.contains("dns")
        || message.contains("timed out")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_its_own_kind() {
        assert_eq!(categorize(Some(404), "Not Found"), GitHubErrorKind::NotFound);
    }

    #[test]
    fn server_errors_are_transient() {
        assert_eq!(categorize(Some(500), ""), GitHubErrorKind::Transient);
        assert_eq!(categorize(Some(503), ""), GitHubErrorKind::Transient);
        assert_eq!(categorize(Some(429), ""), GitHubErrorKind::Transient);
    }

    #[test]
    fn rate_limited_403_is_transient() {
        assert_eq!(
            categorize(Some(403), "API rate limit exceeded"),
            GitHubErrorKind::Transient
        );
        assert_eq!(
            categorize(Some(403), "Permission denied"),
            GitHubErrorKind::Permanent
        );
    }

    #[test]
    fn other_4xx_is_permanent() {
        assert_eq!(categorize(Some(401), ""), GitHubErrorKind::Permanent);
        assert_eq!(categorize(Some(422), ""), GitHubErrorKind::Permanent);
    }

    #[test]
    fn no_status_falls_back_to_message() {
        assert_eq!(
            categorize(None, "connection timed out"),
            GitHubErrorKind::Transient
        );
        assert_eq!(
            categorize(None, "something else entirely"),
            GitHubErrorKind::Permanent
        );
    }

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limit_error("API rate limit exceeded"));
        assert!(is_rate_limit_error("secondary rate limit"));
        assert!(!is_rate_limit_error("Permission denied"));
    }

    #[test]
    fn network_error_detection() {
        assert!(is_network_error("connection refused"));
        assert!(is_network_error("DNS resolution failed"));
        assert!(is_network_error("request timed out"));
        assert!(!is_network_error("Not found"));
    }

    #[test]
    fn retriable_kinds() {
        assert!(GitHubErrorKind::Transient.is_retriable());
        assert!(!GitHubErrorKind::Permanent.is_retriable());
        assert!(!GitHubErrorKind::NotFound.is_retriable());
    }
}
