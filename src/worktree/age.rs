//! Worktree age, derived from the last commit.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};

use crate::git::{GitResult, GitRunner};

/// Returns the timestamp of the last commit in the worktree, or `None` for
/// a worktree with no dateable history.
pub fn last_activity(git: &dyn GitRunner, path: &Path) -> GitResult<Option<DateTime<Utc>>> {
    let out = git.run(path, &["log", "-1", "--format=%ci"])?;
    Ok(parse_commit_date(&out))
}

/// Age of the worktree in whole days since its last commit. `None` when
/// the worktree cannot be dated.
pub fn age_days(git: &dyn GitRunner, path: &Path) -> GitResult<Option<i64>> {
    let Some(last) = last_activity(git, path)? else {
        return Ok(None);
    };
    Ok(Some((Utc::now() - last).num_days()))
}

/// Parses `git log --format=%ci` output: `2024-01-15 14:30:00 -0800`,
/// falling back to a bare date.
fn parse_commit_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(t) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z") {
        return Some(t.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}
