//! Dispatcher: drains a workqueue through a reconciler.
//!
//! Each invocation leases items up to its parallelism bound, runs each
//! through the reconciler as its own task, and reports the outcome back to
//! the queue. It returns when the queue has nothing leasable or its budget
//! expires. Cancellation stops new leases; in-flight reconciliations run
//! to completion and their outcomes are discarded.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::queue::{Lease, ReconcileError, WorkQueue};
use crate::reconcile::Reconcile;

pub struct Dispatcher<R> {
    name: &'static str,
    queue: Arc<WorkQueue>,
    reconciler: Arc<R>,
    parallelism: usize,
}

impl<R: Reconcile + 'static> Dispatcher<R> {
    pub fn new(
        name: &'static str,
        queue: Arc<WorkQueue>,
        reconciler: Arc<R>,
        parallelism: usize,
    ) -> Self {
        Dispatcher {
            name,
            queue,
            reconciler,
            parallelism: parallelism.max(1),
        }
    }

    /// One dispatch pass: lease, reconcile, report, until the queue has
    /// nothing leasable or `budget` is spent.
    pub async fn run_once(&self, cancel: &CancellationToken, budget: Duration) {
        let deadline = Instant::now() + budget;
        let mut tasks: JoinSet<(Lease, Result<(), ReconcileError>)> = JoinSet::new();

        loop {
            if !cancel.is_cancelled() && Instant::now() < deadline {
                while tasks.len() < self.parallelism {
                    let Some(lease) = self.queue.lease() else {
                        break;
                    };
                    tracing::debug!(dispatcher = self.name, key = lease.key(), "dispatching");
                    let reconciler = Arc::clone(&self.reconciler);
                    let cancel = cancel.clone();
                    tasks.spawn(async move {
                        let result = reconciler.reconcile(cancel, lease.key()).await;
                        (lease, result)
                    });
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((lease, result)) => {
                    if cancel.is_cancelled() {
                        // Shutting down; the outcome is discarded and the
                        // item re-derives on the next daemon run.
                        drop(lease);
                    } else {
                        self.queue.complete(lease, result);
                    }
                }
                Err(err) => {
                    // The lease is lost with the panicked task; the item
                    // stays invisible until the process restarts.
                    tracing::error!(dispatcher = self.name, error = %err, "reconcile task panicked");
                }
            }
        }
    }
}
