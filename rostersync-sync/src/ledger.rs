//! Identity ledger: one durable row per identity ever observed.
//!
//! The tracking region has a fixed header at row 1 and one data row per
//! identity below it, in insertion order. Rows are never deleted or
//! reordered; identities that leave are marked `left`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use rostersync_core::types::{format_timestamp, LEDGER_HEADER};
use rostersync_core::{CellRef, GridSnapshot, Identity, LedgerRow, LedgerStatus, RegionName};

use crate::plan::{RangeWrite, WriteOp};

/// The fixed header row as owned cells.
pub fn header_cells() -> Vec<String> {
    LEDGER_HEADER.iter().map(|s| s.to_string()).collect()
}

/// A ledger row together with its one-based position in the region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub row_index: usize,
    pub row: LedgerRow,
}

/// A row to write: `row_index = None` means append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    pub row_index: Option<usize>,
    pub row: LedgerRow,
}

/// Upserts for one roster snapshot plus what they mean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerDelta {
    pub upserts: Vec<Upsert>,
    /// Live identities that already had a ledger row.
    pub matched: usize,
    /// Live identities seen for the first time.
    pub unmatched: usize,
    /// Rows that moved from `active` to `left`.
    pub departed: usize,
}

/// Parsed view of the tracking region.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    by_id: HashMap<String, usize>,
    header_present: bool,
    next_row: usize,
}

impl Ledger {
    pub fn parse(snapshot: &GridSnapshot) -> Self {
        let header_present = snapshot.row(1).iter().any(|c| !c.trim().is_empty());
        let mut entries = Vec::new();
        let mut by_id = HashMap::new();

        for (i, cells) in snapshot.rows.iter().enumerate().skip(1) {
            let row_index = i + 1;
            let Some(row) = LedgerRow::from_cells(cells) else {
                continue;
            };
            if by_id.contains_key(&row.identity_id) {
                tracing::warn!(
                    "duplicate ledger id {} at row {}; keeping the first occurrence",
                    row.identity_id,
                    row_index
                );
                continue;
            }
            by_id.insert(row.identity_id.clone(), entries.len());
            entries.push(LedgerEntry { row_index, row });
        }

        Self {
            entries,
            by_id,
            header_present,
            next_row: crate::store::next_free_row(snapshot).max(2),
        }
    }

    pub fn header_present(&self) -> bool {
        self.header_present
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn get(&self, identity_id: &str) -> Option<&LedgerEntry> {
        self.by_id.get(identity_id).map(|&i| &self.entries[i])
    }

    /// Active rows in insertion order.
    pub fn active(&self) -> impl Iterator<Item = &LedgerRow> {
        self.entries
            .iter()
            .map(|e| &e.row)
            .filter(|r| r.status == LedgerStatus::Active)
    }

    /// Compute the minimal set of row upserts for a roster snapshot.
    ///
    /// `refresh` is how old `last_seen` may get on an otherwise unchanged
    /// active row before it is rewritten.
    pub fn delta(
        &self,
        identities: &[Identity],
        now: DateTime<Utc>,
        refresh: Duration,
    ) -> LedgerDelta {
        let stamp = format_timestamp(now);
        let mut delta = LedgerDelta::default();
        let mut live: HashSet<&str> = HashSet::new();
        let mut inserts = Vec::new();

        for identity in identities.iter().filter(|i| i.is_live) {
            if !live.insert(identity.id.as_str()) {
                continue;
            }
            match self.get(&identity.id) {
                Some(entry) => {
                    delta.matched += 1;
                    let stored = &entry.row;
                    let stale = stored
                        .last_seen_at()
                        .map_or(true, |seen| now - seen >= refresh);
                    let unchanged = stored.status == LedgerStatus::Active
                        && stored.display_name == identity.display_name;
                    let next = LedgerRow {
                        identity_id: stored.identity_id.clone(),
                        display_name: identity.display_name.clone(),
                        first_seen: stored.first_seen.clone(),
                        last_seen: if unchanged && !stale {
                            stored.last_seen.clone()
                        } else {
                            stamp.clone()
                        },
                        status: LedgerStatus::Active,
                    };
                    if &next != stored {
                        delta.upserts.push(Upsert {
                            row_index: Some(entry.row_index),
                            row: next,
                        });
                    }
                }
                None => {
                    delta.unmatched += 1;
                    inserts.push(Upsert {
                        row_index: None,
                        row: LedgerRow::observed(identity, now),
                    });
                }
            }
        }

        for entry in &self.entries {
            if live.contains(entry.row.identity_id.as_str())
                || entry.row.status == LedgerStatus::Left
            {
                continue;
            }
            delta.departed += 1;
            delta.upserts.push(Upsert {
                row_index: Some(entry.row_index),
                row: LedgerRow {
                    last_seen: stamp.clone(),
                    status: LedgerStatus::Left,
                    ..entry.row.clone()
                },
            });
        }

        delta.upserts.sort_by_key(|u| u.row_index);
        delta.upserts.extend(inserts);
        delta
    }

    /// Fold upserts into this view so it reflects the post-sync ledger.
    pub fn apply(&mut self, upserts: &[Upsert]) {
        for upsert in upserts {
            match upsert.row_index {
                Some(_) => {
                    if let Some(&i) = self.by_id.get(&upsert.row.identity_id) {
                        self.entries[i].row = upsert.row.clone();
                    }
                }
                None => {
                    self.by_id
                        .insert(upsert.row.identity_id.clone(), self.entries.len());
                    self.entries.push(LedgerEntry {
                        row_index: self.next_row,
                        row: upsert.row.clone(),
                    });
                    self.next_row += 1;
                }
            }
        }
        self.header_present = true;
    }
}

/// Turn upserts into remote writes.
///
/// Updates to consecutive rows coalesce into one full-row range write;
/// inserts become one `append_row` each, after all updates.
pub fn plan_writes(region: &RegionName, upserts: &[Upsert]) -> Vec<WriteOp> {
    let mut updates: Vec<(usize, Vec<String>)> = upserts
        .iter()
        .filter_map(|u| u.row_index.map(|i| (i, u.row.to_cells())))
        .collect();
    updates.sort_by_key(|(i, _)| *i);

    let mut ops: Vec<WriteOp> = Vec::new();
    let mut block: Option<(usize, Vec<Vec<String>>)> = None;
    for (row_index, cells) in updates {
        match block.as_mut() {
            Some((start, rows)) if *start + rows.len() == row_index => rows.push(cells),
            _ => {
                if let Some((start, rows)) = block.take() {
                    ops.push(range(region, start, rows));
                }
                block = Some((row_index, vec![cells]));
            }
        }
    }
    if let Some((start, rows)) = block {
        ops.push(range(region, start, rows));
    }

    ops.extend(upserts.iter().filter(|u| u.row_index.is_none()).map(|u| {
        WriteOp::Append {
            region: region.clone(),
            row: u.row.to_cells(),
        }
    }));
    ops
}

fn range(region: &RegionName, start: usize, rows: Vec<Vec<String>>) -> WriteOp {
    WriteOp::Range(RangeWrite {
        region: region.clone(),
        top_left: CellRef::new(start, 0),
        rows,
    })
}
