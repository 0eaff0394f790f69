//! On-disk display cache: `(repo, pr) -> (title, author)`.
//!
//! Purely advisory. Commands fall back to bare PR numbers when an entry is
//! absent, and a corrupt file rehydrates as empty and is overwritten on
//! the next write. Writers use load-merge-store; the last writer wins.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::PrNumber;

/// Cached PR metadata for display purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrMeta {
    pub title: String,
    pub author: String,
}

fn cache_file(state_dir: &Path) -> std::path::PathBuf {
    state_dir.join("pr_cache.json")
}

fn cache_key(repo: &str, pr: PrNumber) -> String {
    format!("{}/{}", repo, pr.0)
}

/// Reads the cache from disk. Empty on any error.
pub fn load(state_dir: &Path) -> BTreeMap<String, PrMeta> {
    let Ok(data) = std::fs::read(cache_file(state_dir)) else {
        return BTreeMap::new();
    };
    serde_json::from_slice(&data).unwrap_or_default()
}

/// Writes the cache to disk.
pub fn save(state_dir: &Path, cache: &BTreeMap<String, PrMeta>) -> std::io::Result<()> {
    std::fs::create_dir_all(state_dir)?;
    let data = serde_json::to_vec_pretty(cache)?;
    std::fs::write(cache_file(state_dir), data)
}

/// Looks up PR metadata by repo short name and PR number.
pub fn get(state_dir: &Path, repo: &str, pr: PrNumber) -> Option<PrMeta> {
    load(state_dir).remove(&cache_key(repo, pr))
}

/// Stores PR metadata, merging with whatever is on disk.
pub fn set(
    state_dir: &Path,
    repo: &str,
    pr: PrNumber,
    title: &str,
    author: &str,
) -> std::io::Result<()> {
    let mut cache = load(state_dir);
    cache.insert(
        cache_key(repo, pr),
        PrMeta {
            title: title.to_string(),
            author: author.to_string(),
        },
    );
    save(state_dir, &cache)
}
