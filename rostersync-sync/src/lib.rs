//! # rostersync-sync
//!
//! Roster ⇄ grid reconciliation engine.
//!
//! Call [`reconcile`] with any [`GridStore`] / [`RosterSource`] pair, or
//! [`pipeline::run_roster_at`] to reconcile a configured roster against the
//! file-backed adapters under `~/.rostersync/`.

pub mod error;
pub mod layout;
pub mod ledger;
pub mod local;
pub mod memory;
pub mod pipeline;
pub mod plan;
pub mod reconcile;
pub mod rules;
pub mod store;

pub use error::{StoreError, SyncError};
pub use plan::{RangeWrite, WriteOp};
pub use reconcile::{reconcile, with_retry, RunOptions, RunReport, RunStage, StageOutcome};
pub use store::{GridStore, RosterSource};
