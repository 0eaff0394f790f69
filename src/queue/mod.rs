//! Bounded, de-duplicating workqueue over opaque keys.
//!
//! The queue is the daemon's retry engine. Each key appears at most once;
//! a leased key is invisible to other leasers, and re-enqueueing it
//! collapses into the leased item (the work runs once more after the
//! current lease completes). Completion outcomes are classified as
//! success, retriable, or terminal; retriable failures re-schedule with
//! exponential backoff until the attempt cap drops them.
//!
//! Within one key this yields a strict serial order: de-duplication plus
//! the single in-flight lease mean no two reconciliations of the same key
//! ever overlap.

mod backoff;

pub use backoff::Backoff;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use thiserror::Error;

use crate::git::GitError;
use crate::github::{GitHubApiError, GitHubErrorKind};

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue is at capacity.
    #[error("queue full: capacity {0} reached")]
    Full(usize),
}

/// A reconciliation failure, classified for the queue's retry decision.
#[derive(Debug)]
pub struct ReconcileError {
    terminal: bool,
    detail: Option<String>,
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl ReconcileError {
    /// A failure worth retrying with backoff.
    pub fn retriable(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ReconcileError {
            terminal: false,
            detail: None,
            source: source.into(),
        }
    }

    /// A failure no number of retries will fix. `detail` is the short
    /// classification recorded alongside the drop.
    pub fn non_retriable(
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
        detail: impl Into<String>,
    ) -> Self {
        ReconcileError {
            terminal: true,
            detail: Some(detail.into()),
            source: source.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// The classification detail of a terminal error, `None` for
    /// retriable ones. This is the classifier dispatchers and tests
    /// consult.
    pub fn non_retriable_details(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{detail}: {}", self.source),
            None => write!(f, "{}", self.source),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<GitError> for ReconcileError {
    fn from(err: GitError) -> Self {
        // Any subprocess failure is retriable.
        ReconcileError::retriable(err)
    }
}

impl From<GitHubApiError> for ReconcileError {
    fn from(err: GitHubApiError) -> Self {
        match err.kind {
            GitHubErrorKind::Transient => ReconcileError::retriable(err),
            GitHubErrorKind::NotFound => ReconcileError::non_retriable(err, "not found"),
            GitHubErrorKind::Permanent => ReconcileError::non_retriable(err, "permanent API error"),
        }
    }
}

/// Options for enqueueing. Lower priority values are more urgent.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueOptions {
    pub priority: i32,
}

#[derive(Debug)]
struct Item {
    priority: i32,
    attempt: u32,
    seq: u64,
    not_before: Option<Instant>,
    leased: bool,
    resubmitted: bool,
}

/// An exclusive claim on one key. Return it via [`WorkQueue::complete`].
#[derive(Debug)]
pub struct Lease {
    key: String,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Default)]
struct Inner {
    items: HashMap<String, Item>,
    next_seq: u64,
}

/// A bounded FIFO with priority bands, key de-duplication, and retry
/// bookkeeping.
#[derive(Debug)]
pub struct WorkQueue {
    name: &'static str,
    capacity: usize,
    max_attempts: u32,
    backoff: Backoff,
    inner: Mutex<Inner>,
}

impl WorkQueue {
    /// Creates a queue that drops items after `max_attempts` failed
    /// reconciliations.
    pub fn new(name: &'static str, capacity: usize, max_attempts: u32) -> Self {
        Self::with_backoff(name, capacity, max_attempts, Backoff::default())
    }

    pub fn with_backoff(
        name: &'static str,
        capacity: usize,
        max_attempts: u32,
        backoff: Backoff,
    ) -> Self {
        WorkQueue {
            name,
            capacity,
            max_attempts,
            backoff,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Adds a key if absent. A present key has its priority upgraded if
    /// the new one is more urgent; a leased key additionally records that
    /// work arrived again, so it runs once more after the current lease.
    pub fn enqueue(&self, key: &str, opts: QueueOptions) -> Result<(), QueueError> {
        let mut inner = self.lock();

        if let Some(item) = inner.items.get_mut(key) {
            if opts.priority < item.priority {
                item.priority = opts.priority;
            }
            if item.leased {
                item.resubmitted = true;
            }
            tracing::debug!(queue = self.name, key, "enqueue collapsed into existing item");
            return Ok(());
        }

        if inner.items.len() >= self.capacity {
            return Err(QueueError::Full(self.capacity));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.items.insert(
            key.to_string(),
            Item {
                priority: opts.priority,
                attempt: 0,
                seq,
                not_before: None,
                leased: false,
                resubmitted: false,
            },
        );
        Ok(())
    }

    /// Claims the most urgent eligible item: smallest priority value
    /// first, FIFO within a band. Items backing off or already leased are
    /// invisible. `None` when nothing is eligible.
    pub fn lease(&self) -> Option<Lease> {
        let now = Instant::now();
        let mut inner = self.lock();

        let key = inner
            .items
            .iter()
            .filter(|(_, item)| !item.leased && item.not_before.is_none_or(|t| t <= now))
            .min_by_key(|(_, item)| (item.priority, item.seq))
            .map(|(key, _)| key.clone())?;

        if let Some(item) = inner.items.get_mut(&key) {
            item.leased = true;
            item.not_before = None;
        }

        Some(Lease { key })
    }

    /// Releases a lease with its outcome.
    ///
    /// Success removes the item unless work arrived during the lease, in
    /// which case it is re-armed for one more pass. Terminal failures and
    /// exhausted retries drop the item with an error record; retriable
    /// failures re-schedule it with backoff.
    pub fn complete(&self, lease: Lease, result: Result<(), ReconcileError>) {
        let mut inner = self.lock();
        let Some(item) = inner.items.get_mut(&lease.key) else {
            return;
        };

        match result {
            Ok(()) => {
                if item.resubmitted {
                    tracing::debug!(queue = self.name, key = %lease.key, "work arrived during lease; re-running");
                    item.leased = false;
                    item.resubmitted = false;
                    item.attempt = 0;
                } else {
                    inner.items.remove(&lease.key);
                }
            }
            Err(err) if err.is_terminal() => {
                tracing::error!(
                    queue = self.name,
                    key = %lease.key,
                    error = %err,
                    "dropping item: non-retriable failure"
                );
                inner.items.remove(&lease.key);
            }
            Err(err) => {
                item.attempt += 1;
                if item.attempt >= self.max_attempts {
                    tracing::error!(
                        queue = self.name,
                        key = %lease.key,
                        attempts = item.attempt,
                        error = %err,
                        "dropping item: retry cap reached"
                    );
                    inner.items.remove(&lease.key);
                } else {
                    let delay = self.backoff.delay(&lease.key, item.attempt);
                    item.not_before = Some(Instant::now() + delay);
                    item.leased = false;
                    item.resubmitted = false;
                    tracing::warn!(
                        queue = self.name,
                        key = %lease.key,
                        attempt = item.attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "reconcile failed; backing off"
                    );
                }
            }
        }
    }

    /// Number of items in the queue, leased ones included.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn queue() -> WorkQueue {
        WorkQueue::new("test", 10, 5)
    }

    fn retriable() -> ReconcileError {
        ReconcileError::retriable(std::io::Error::other("boom"))
    }

    fn terminal() -> ReconcileError {
        ReconcileError::non_retriable(std::io::Error::other("boom"), "bad input")
    }

    #[test]
    fn enqueue_then_lease() {
        let q = queue();
        q.enqueue("app:42", QueueOptions { priority: 1 }).unwrap();
        assert_eq!(q.len(), 1);

        let lease = q.lease().unwrap();
        assert_eq!(lease.key(), "app:42");
        q.complete(lease, Ok(()));
        assert!(q.is_empty());
    }

    #[test]
    fn duplicate_enqueue_collapses() {
        let q = queue();
        q.enqueue("app:42", QueueOptions::default()).unwrap();
        q.enqueue("app:42", QueueOptions::default()).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn priority_upgrade_on_duplicate() {
        let q = queue();
        q.enqueue("a", QueueOptions { priority: 5 }).unwrap();
        q.enqueue("b", QueueOptions { priority: 3 }).unwrap();
        // Upgrading "a" to more urgent than "b" changes lease order.
        q.enqueue("a", QueueOptions { priority: 1 }).unwrap();

        assert_eq!(q.lease().unwrap().key(), "a");
    }

    #[test]
    fn duplicate_never_downgrades_priority() {
        let q = queue();
        q.enqueue("a", QueueOptions { priority: 1 }).unwrap();
        q.enqueue("b", QueueOptions { priority: 3 }).unwrap();
        q.enqueue("a", QueueOptions { priority: 9 }).unwrap();

        assert_eq!(q.lease().unwrap().key(), "a");
    }

    #[test]
    fn fifo_within_priority_band() {
        let q = queue();
        for key in ["one", "two", "three"] {
            q.enqueue(key, QueueOptions { priority: 1 }).unwrap();
        }
        assert_eq!(q.lease().unwrap().key(), "one");
        assert_eq!(q.lease().unwrap().key(), "two");
        assert_eq!(q.lease().unwrap().key(), "three");
    }

    #[test]
    fn smaller_priority_value_leases_first() {
        let q = queue();
        q.enqueue("later", QueueOptions { priority: 5 }).unwrap();
        q.enqueue("urgent", QueueOptions { priority: 1 }).unwrap();
        assert_eq!(q.lease().unwrap().key(), "urgent");
        assert_eq!(q.lease().unwrap().key(), "later");
    }

    #[test]
    fn capacity_is_enforced() {
        let q = WorkQueue::new("test", 2, 5);
        q.enqueue("a", QueueOptions::default()).unwrap();
        q.enqueue("b", QueueOptions::default()).unwrap();
        assert!(matches!(
            q.enqueue("c", QueueOptions::default()),
            Err(QueueError::Full(2))
        ));
        // A duplicate of a queued key is not a new item.
        q.enqueue("a", QueueOptions::default()).unwrap();
    }

    #[test]
    fn leased_key_is_invisible() {
        let q = queue();
        q.enqueue("app:42", QueueOptions::default()).unwrap();
        let lease = q.lease().unwrap();
        assert!(q.lease().is_none());
        q.complete(lease, Ok(()));
    }

    #[test]
    fn enqueue_during_lease_runs_again() {
        let q = queue();
        q.enqueue("app:42", QueueOptions::default()).unwrap();
        let lease = q.lease().unwrap();

        // Work arrives again mid-flight.
        q.enqueue("app:42", QueueOptions::default()).unwrap();
        assert_eq!(q.len(), 1);

        q.complete(lease, Ok(()));
        // Still queued for one more pass.
        let lease = q.lease().unwrap();
        assert_eq!(lease.key(), "app:42");
        q.complete(lease, Ok(()));
        assert!(q.is_empty());
    }

    #[test]
    fn terminal_error_drops_item() {
        let q = queue();
        q.enqueue("app:42", QueueOptions::default()).unwrap();
        let lease = q.lease().unwrap();
        q.complete(lease, Err(terminal()));
        assert!(q.is_empty());
    }

    #[test]
    fn retriable_error_backs_off() {
        let q = WorkQueue::with_backoff(
            "test",
            10,
            5,
            Backoff {
                base: Duration::from_millis(40),
                cap: Duration::from_secs(1),
                jitter_percent: 0,
            },
        );
        q.enqueue("app:42", QueueOptions::default()).unwrap();

        let lease = q.lease().unwrap();
        q.complete(lease, Err(retriable()));

        // Backing off: present but invisible.
        assert_eq!(q.len(), 1);
        assert!(q.lease().is_none());

        std::thread::sleep(Duration::from_millis(60));
        let lease = q.lease().unwrap();
        assert_eq!(lease.key(), "app:42");
        q.complete(lease, Ok(()));
    }

    #[test]
    fn retry_cap_drops_item() {
        let q = WorkQueue::with_backoff(
            "test",
            10,
            3,
            Backoff {
                base: Duration::from_millis(1),
                cap: Duration::from_millis(2),
                jitter_percent: 0,
            },
        );
        q.enqueue("app:42", QueueOptions::default()).unwrap();

        for _ in 0..2 {
            std::thread::sleep(Duration::from_millis(5));
            let lease = q.lease().unwrap();
            q.complete(lease, Err(retriable()));
            assert_eq!(q.len(), 1);
        }

        // Third failure hits the cap.
        std::thread::sleep(Duration::from_millis(5));
        let lease = q.lease().unwrap();
        q.complete(lease, Err(retriable()));
        assert!(q.is_empty());
    }

    #[test]
    fn classifier_distinguishes_kinds() {
        assert!(terminal().is_terminal());
        assert_eq!(terminal().non_retriable_details(), Some("bad input"));
        assert!(!retriable().is_terminal());
        assert_eq!(retriable().non_retriable_details(), None);
    }

    #[test]
    fn git_errors_convert_retriable() {
        let err: ReconcileError = crate::git::GitError::CommandFailed {
            command: "git fetch".to_string(),
            output: "network unreachable".to_string(),
        }
        .into();
        assert!(!err.is_terminal());
    }

    #[test]
    fn github_errors_convert_by_kind() {
        let transient: ReconcileError =
            GitHubApiError::transient_without_source("503").into();
        assert!(!transient.is_terminal());

        let permanent: ReconcileError =
            GitHubApiError::permanent_without_source("401").into();
        assert!(permanent.is_terminal());
    }

    proptest! {
        /// Leases come out ordered by (priority, enqueue order).
        #[test]
        fn lease_order_is_priority_then_fifo(priorities in proptest::collection::vec(0i32..4, 1..10)) {
            let q = WorkQueue::new("test", 64, 5);
            for (i, p) in priorities.iter().enumerate() {
                q.enqueue(&format!("key-{i}"), QueueOptions { priority: *p }).unwrap();
            }

            let mut leased: Vec<(i32, usize)> = Vec::new();
            while let Some(lease) = q.lease() {
                let idx: usize = lease.key().strip_prefix("key-").unwrap().parse().unwrap();
                leased.push((priorities[idx], idx));
            }

            prop_assert_eq!(leased.len(), priorities.len());
            for pair in leased.windows(2) {
                prop_assert!(pair[0] <= pair[1], "out of order: {:?}", pair);
            }
        }
    }
}
