//! Reconcilers: idempotent drivers from a PR key toward a target state.
//!
//! Both reconcilers share one capability set so the dispatcher can be
//! generic over them. Each `reconcile` call is safe to interrupt and
//! re-run: every step re-checks the world before acting.

mod cleanup;
mod setup;

pub use cleanup::{CleanupReconciler, scan_merged_prs};
pub use setup::SetupReconciler;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::queue::ReconcileError;

/// The capability set a dispatcher drives.
pub trait Reconcile: Send + Sync {
    /// Drives `key` toward its target state. Errors carry the
    /// retriable/terminal classification the queue honours.
    fn reconcile(
        &self,
        cancel: CancellationToken,
        key: &str,
    ) -> impl Future<Output = Result<(), ReconcileError>> + Send;

    /// Swaps in a freshly reloaded configuration.
    fn set_config(&self, cfg: Arc<Config>);
}
