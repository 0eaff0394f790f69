//! User configuration loaded from `~/.zen/config.yaml`.
//!
//! The config maps short repo names to their upstream `owner/repo` names and
//! local base directories, lists the authors whose PRs get automatic
//! worktree setup, and tunes the watch daemon's tickers and queues. All
//! watch-section fields are optional with defaults matching the daemon's
//! documented behavior.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors from loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file does not exist.
    #[error("config file not found: {0} (create it before starting the daemon)")]
    NotFound(PathBuf),

    /// IO error reading the config file.
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    /// The YAML failed to parse.
    #[error("parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Per-repository configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoConfig {
    /// Canonical upstream name, `owner/repo`.
    pub full_name: String,

    /// Local base directory. Contains the primary clone in a directory
    /// named after the repo's short name, plus any `<short>-pr-<n>`
    /// worktrees.
    pub base_path: PathBuf,
}

/// Tuning for the watch daemon's queues and tickers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchConfig {
    /// Interval between dispatch passes, e.g. `"10s"`.
    #[serde(default)]
    pub dispatch_interval: Option<String>,

    /// Interval between cleanup scans, e.g. `"1h"`.
    #[serde(default)]
    pub cleanup_interval: Option<String>,

    /// Days a merged PR's worktree must age before removal.
    #[serde(default)]
    pub cleanup_after_days: Option<u32>,

    /// Parallelism of the setup dispatcher.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Retry cap for setup reconciliations.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl WatchConfig {
    pub fn dispatch_interval(&self) -> Duration {
        self.dispatch_interval
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(10))
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(3600))
    }

    pub fn cleanup_after_days(&self) -> u32 {
        match self.cleanup_after_days {
            Some(d) if d > 0 => d,
            _ => 5,
        }
    }

    pub fn concurrency(&self) -> usize {
        match self.concurrency {
            Some(c) if c > 0 => c,
            _ => 2,
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self.max_retries {
            Some(r) if r > 0 => r,
            _ => 5,
        }
    }
}

/// The complete zen configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repos: BTreeMap<String, RepoConfig>,

    /// Authors whose review requests get automatic worktree setup.
    #[serde(default)]
    pub authors: Vec<String>,

    /// Poll interval, e.g. `"5m"`.
    #[serde(default)]
    pub poll_interval: Option<String>,

    #[serde(default)]
    pub watch: WatchConfig,
}

impl Config {
    /// Reads the YAML config from `~/.zen/config.yaml`.
    pub fn load() -> Result<Config, ConfigError> {
        Self::load_from(&config_file())
    }

    /// Reads the YAML config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut cfg: Config = serde_yaml::from_str(&data)?;
        cfg.expand_paths();
        Ok(cfg)
    }

    /// Replaces a leading `~/` in every base path with `$HOME`.
    fn expand_paths(&mut self) {
        let home = home_dir();
        for repo in self.repos.values_mut() {
            if let Ok(rest) = repo.base_path.strip_prefix("~") {
                repo.base_path = home.join(rest);
            }
        }
    }

    /// All configured short repo names.
    pub fn repo_names(&self) -> impl Iterator<Item = &str> {
        self.repos.keys().map(String::as_str)
    }

    /// Maps a short name to the upstream `owner/repo` name. Falls back to
    /// the short name itself for unconfigured repos.
    pub fn repo_full_name<'a>(&'a self, short: &'a str) -> &'a str {
        self.repos
            .get(short)
            .map(|r| r.full_name.as_str())
            .unwrap_or(short)
    }

    /// Maps an upstream `owner/repo` name back to its short name. Falls
    /// back to the last path component.
    pub fn repo_short_name<'a>(&'a self, full: &'a str) -> &'a str {
        for (name, repo) in &self.repos {
            if repo.full_name == full {
                return name;
            }
        }
        full.rsplit('/').next().unwrap_or(full)
    }

    /// The local base directory for a repo, or `None` if unconfigured.
    pub fn repo_base_path(&self, short: &str) -> Option<&Path> {
        self.repos.get(short).map(|r| r.base_path.as_path())
    }

    /// Whether the login is in the auto-setup author list.
    pub fn is_author(&self, login: &str) -> bool {
        self.authors.iter().any(|a| a == login)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(300))
    }
}

/// Parses durations of the form `90s`, `10m`, `2h` (or a bare number of
/// seconds). Returns `None` for anything else.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = value.parse().ok()?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Path to `~/.zen`.
pub fn zen_home() -> PathBuf {
    home_dir().join(".zen")
}

/// Path to `~/.zen/config.yaml`.
pub fn config_file() -> PathBuf {
    zen_home().join("config.yaml")
}

/// Path to the daemon state directory, `~/.zen/state`.
pub fn state_dir() -> PathBuf {
    zen_home().join("state")
}

/// Creates the state directory if missing.
pub fn ensure_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(state_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            repos: BTreeMap::from([(
                "app".to_string(),
                RepoConfig {
                    full_name: "acme/app".to_string(),
                    base_path: PathBuf::from("/tmp/acme"),
                },
            )]),
            authors: vec!["alice".to_string()],
            poll_interval: None,
            watch: WatchConfig::default(),
        }
    }

    #[test]
    fn defaults() {
        let cfg = sample();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(300));
        assert_eq!(cfg.watch.dispatch_interval(), Duration::from_secs(10));
        assert_eq!(cfg.watch.cleanup_interval(), Duration::from_secs(3600));
        assert_eq!(cfg.watch.cleanup_after_days(), 5);
        assert_eq!(cfg.watch.concurrency(), 2);
        assert_eq!(cfg.watch.max_retries(), 5);
    }

    #[test]
    fn name_mapping() {
        let cfg = sample();
        assert_eq!(cfg.repo_full_name("app"), "acme/app");
        assert_eq!(cfg.repo_full_name("unknown"), "unknown");
        assert_eq!(cfg.repo_short_name("acme/app"), "app");
        assert_eq!(cfg.repo_short_name("other/thing"), "thing");
        assert_eq!(cfg.repo_base_path("app"), Some(Path::new("/tmp/acme")));
        assert_eq!(cfg.repo_base_path("unknown"), None);
    }

    #[test]
    fn author_match() {
        let cfg = sample();
        assert!(cfg.is_author("alice"));
        assert!(!cfg.is_author("eve"));
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("10x"), None);
    }

    #[test]
    fn yaml_parsing_with_watch_section() {
        let yaml = r#"
repos:
  app:
    full_name: acme/app
    base_path: /tmp/acme
authors: [alice, bob]
poll_interval: 2m
watch:
  dispatch_interval: 5s
  cleanup_after_days: 7
  concurrency: 4
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(120));
        assert_eq!(cfg.watch.dispatch_interval(), Duration::from_secs(5));
        assert_eq!(cfg.watch.cleanup_after_days(), 7);
        assert_eq!(cfg.watch.concurrency(), 4);
        assert_eq!(cfg.watch.max_retries(), 5);
        assert!(cfg.is_author("bob"));
    }

    #[test]
    fn tilde_expansion() {
        let yaml = r#"
repos:
  app:
    full_name: acme/app
    base_path: ~/src
"#;
        let mut cfg: Config = serde_yaml::from_str(yaml).unwrap();
        cfg.expand_paths();
        let base = cfg.repo_base_path("app").unwrap();
        assert!(!base.starts_with("~"), "expected ~ expanded, got {base:?}");
        assert!(base.ends_with("src"));
    }
}
