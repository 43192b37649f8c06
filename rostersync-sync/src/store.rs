//! Seams to the outside world: the grid being written and the roster being read.

use async_trait::async_trait;

use rostersync_core::{CellRef, GridSnapshot, Identity, RegionName, RosterId};

use crate::error::StoreError;

/// A tabular store bound to one sheet.
///
/// Every method is one remote call. Implementations must not retry on their
/// own; the orchestrator owns retry and backoff.
#[async_trait]
pub trait GridStore: Send + Sync {
    /// Full read of a region. Fails if the region does not exist.
    async fn read_region(&self, region: &RegionName) -> Result<GridSnapshot, StoreError>;

    /// Overwrite the rectangle whose top-left corner is `top_left`.
    async fn write_range(
        &self,
        region: &RegionName,
        top_left: CellRef,
        rows: &[Vec<String>],
    ) -> Result<(), StoreError>;

    /// Write `row` starting at column A of the row after the last non-blank row.
    async fn append_row(&self, region: &RegionName, row: &[String]) -> Result<(), StoreError>;

    /// Create a region whose first row is `header`.
    async fn create_region(&self, region: &RegionName, header: &[String])
        -> Result<(), StoreError>;

    async fn list_regions(&self) -> Result<Vec<RegionName>, StoreError>;
}

/// The live membership roster.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn list_identities(&self, roster: &RosterId) -> Result<Vec<Identity>, StoreError>;
}

/// One-based row after the last row holding any non-blank cell.
///
/// Shared by the bundled stores so `append_row` lands where the ledger
/// expects it.
pub fn next_free_row(snapshot: &GridSnapshot) -> usize {
    snapshot
        .rows
        .iter()
        .rposition(|r| r.iter().any(|c| !c.trim().is_empty()))
        .map(|i| i + 2)
        .unwrap_or(1)
}
