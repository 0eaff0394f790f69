//! zen-watch - a background daemon that turns GitHub review requests into
//! ready-to-review git worktrees.
//!
//! The daemon polls for review requests, sets up an isolated worktree per
//! PR (branch fetched, context document injected, display metadata
//! cached), and removes worktrees once their PRs are merged and aged.
//! Work flows through two de-duplicating queues drained by idempotent
//! reconcilers under bounded concurrency.

pub mod cache;
pub mod commands;
pub mod config;
pub mod context;
pub mod daemon;
pub mod dispatch;
pub mod git;
pub mod github;
pub mod notify;
pub mod queue;
pub mod reconcile;
pub mod state;
pub mod types;
pub mod worktree;
