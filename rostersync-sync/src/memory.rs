//! In-memory grid store and roster source.
//!
//! Every call is recorded, and failures can be queued per call kind, which
//! is what the orchestrator and scheduler tests lean on.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use rostersync_core::{CellRef, GridSnapshot, Identity, RegionName, RosterId};

use crate::error::StoreError;
use crate::store::{next_free_row, GridStore, RosterSource};

/// Which store method a recorded call or queued failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Read,
    WriteRange,
    Append,
    Create,
    List,
}

impl CallKind {
    pub fn is_write(&self) -> bool {
        matches!(self, CallKind::WriteRange | CallKind::Append | CallKind::Create)
    }
}

/// A call the store received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub kind: CallKind,
    pub region: Option<RegionName>,
    /// Top-left of a range write.
    pub at: Option<CellRef>,
    pub cells: usize,
}

#[derive(Default)]
struct State {
    regions: BTreeMap<RegionName, GridSnapshot>,
    calls: Vec<StoreCall>,
    failures: HashMap<CallKind, VecDeque<StoreError>>,
}

#[derive(Default)]
pub struct MemoryGrid {
    state: Mutex<State>,
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(self, name: impl Into<RegionName>, snapshot: GridSnapshot) -> Self {
        self.lock().regions.insert(name.into(), snapshot);
        self
    }

    pub fn snapshot(&self, name: &RegionName) -> Option<GridSnapshot> {
        self.lock().regions.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Calls that modified the grid (including failed attempts).
    pub fn write_calls(&self) -> Vec<StoreCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.kind.is_write())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make the next call of `kind` fail with `err`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, kind: CallKind, err: StoreError) {
        self.lock().failures.entry(kind).or_default().push_back(err);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the call and pop a queued failure for it, if any.
    fn enter(
        &self,
        kind: CallKind,
        region: Option<&RegionName>,
        at: Option<CellRef>,
        cells: usize,
    ) -> Result<MutexGuard<'_, State>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall {
            kind,
            region: region.cloned(),
            at,
            cells,
        });
        if let Some(err) = state.failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

fn missing(region: &RegionName) -> StoreError {
    StoreError::Fatal(format!("region '{region}' does not exist"))
}

#[async_trait]
impl GridStore for MemoryGrid {
    async fn read_region(&self, region: &RegionName) -> Result<GridSnapshot, StoreError> {
        let state = self.enter(CallKind::Read, Some(region), None, 0)?;
        state.regions.get(region).cloned().ok_or_else(|| missing(region))
    }

    async fn write_range(
        &self,
        region: &RegionName,
        top_left: CellRef,
        rows: &[Vec<String>],
    ) -> Result<(), StoreError> {
        let cells = rows.iter().map(Vec::len).sum();
        let mut state = self.enter(CallKind::WriteRange, Some(region), Some(top_left), cells)?;
        let snapshot = state.regions.get_mut(region).ok_or_else(|| missing(region))?;
        snapshot.paste(top_left, rows);
        Ok(())
    }

    async fn append_row(&self, region: &RegionName, row: &[String]) -> Result<(), StoreError> {
        let mut state = self.enter(CallKind::Append, Some(region), None, row.len())?;
        let snapshot = state.regions.get_mut(region).ok_or_else(|| missing(region))?;
        let at = CellRef::new(next_free_row(snapshot), 0);
        snapshot.paste(at, &[row.to_vec()]);
        Ok(())
    }

    async fn create_region(
        &self,
        region: &RegionName,
        header: &[String],
    ) -> Result<(), StoreError> {
        let mut state = self.enter(CallKind::Create, Some(region), None, header.len())?;
        if state.regions.contains_key(region) {
            return Err(StoreError::Fatal(format!("region '{region}' already exists")));
        }
        state
            .regions
            .insert(region.clone(), GridSnapshot::new(vec![header.to_vec()]));
        Ok(())
    }

    async fn list_regions(&self) -> Result<Vec<RegionName>, StoreError> {
        let state = self.enter(CallKind::List, None, None, 0)?;
        Ok(state.regions.keys().cloned().collect())
    }
}

/// A roster whose membership tests can swap between runs.
#[derive(Default)]
pub struct MemoryRoster {
    identities: Mutex<Vec<Identity>>,
    failures: Mutex<VecDeque<StoreError>>,
}

impl MemoryRoster {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self {
            identities: Mutex::new(identities),
            failures: Mutex::default(),
        }
    }

    pub fn set(&self, identities: Vec<Identity>) {
        *self.identities.lock().unwrap_or_else(|e| e.into_inner()) = identities;
    }

    pub fn fail_next(&self, err: StoreError) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(err);
    }
}

#[async_trait]
impl RosterSource for MemoryRoster {
    async fn list_identities(&self, _roster: &RosterId) -> Result<Vec<Identity>, StoreError> {
        if let Some(err) = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return Err(err);
        }
        Ok(self
            .identities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_failure_is_consumed_once() {
        let grid = MemoryGrid::new().with_region("L", GridSnapshot::default());
        grid.fail_next(CallKind::Read, StoreError::Transient("429".into()));
        let region = RegionName::from("L");
        assert!(grid.read_region(&region).await.is_err());
        assert!(grid.read_region(&region).await.is_ok());
        assert_eq!(grid.calls().len(), 2);
    }

    #[tokio::test]
    async fn append_and_write_mutate_the_region() {
        let region = RegionName::from("L");
        let grid = MemoryGrid::new().with_region("L", GridSnapshot::from_strs(&[&["h"]]));
        grid.append_row(&region, &["a".to_string()]).await.unwrap();
        grid.write_range(&region, CellRef::new(1, 1), &[vec!["x".to_string()]])
            .await
            .unwrap();
        let snap = grid.snapshot(&region).unwrap();
        assert_eq!(snap, GridSnapshot::from_strs(&[&["h", "x"], &["a"]]));
        assert_eq!(grid.write_calls().len(), 2);
    }

    #[tokio::test]
    async fn create_refuses_existing_region() {
        let grid = MemoryGrid::new().with_region("L", GridSnapshot::default());
        let err = grid
            .create_region(&RegionName::from("L"), &[])
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
