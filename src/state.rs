//! Daemon checkpoint: the seen-PR set and last-poll summary.
//!
//! Written to `last_check.json` after every poll and read once at startup.
//! Best-effort: a corrupt or missing file rehydrates as empty. Writes go
//! through a temp file and rename so readers never see a partial snapshot.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The persisted poll checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// When the poll ran (RFC 3339).
    pub timestamp: DateTime<Utc>,

    /// How many review requests the poll observed.
    pub pr_count: usize,

    /// PR numbers the poller has announced, as strings.
    pub seen_prs: Vec<String>,
}

fn checkpoint_file(state_dir: &Path) -> std::path::PathBuf {
    state_dir.join("last_check.json")
}

/// Reads the checkpoint. `None` on any error.
pub fn load_checkpoint(state_dir: &Path) -> Option<Checkpoint> {
    let data = std::fs::read(checkpoint_file(state_dir)).ok()?;
    serde_json::from_slice(&data).ok()
}

/// Rehydrates the seen-PR set from the checkpoint. Empty on any error.
pub fn load_seen(state_dir: &Path) -> HashSet<String> {
    load_checkpoint(state_dir)
        .map(|c| c.seen_prs.into_iter().collect())
        .unwrap_or_default()
}

/// Writes the checkpoint after a poll.
pub fn save_checkpoint(
    state_dir: &Path,
    seen: &HashSet<String>,
    pr_count: usize,
) -> std::io::Result<()> {
    let mut seen_prs: Vec<String> = seen.iter().cloned().collect();
    seen_prs.sort();

    let checkpoint = Checkpoint {
        timestamp: Utc::now(),
        pr_count,
        seen_prs,
    };

    std::fs::create_dir_all(state_dir)?;
    let path = checkpoint_file(state_dir);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(&checkpoint)?)?;
    std::fs::rename(&tmp, &path)
}
