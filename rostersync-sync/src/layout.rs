//! Anchor-based layout planning.
//!
//! A layout owns a run of cells starting at its anchor and extending along
//! its axis. Identity `i` sits at slot `i`. Derived columns sit in *lanes*
//! parallel to that run: another column for vertical layouts, another row
//! for horizontal ones. Lane labels live on the header line directly before
//! the anchor.

use rostersync_core::{Axis, CellRef, ColumnLocator, GridSnapshot, RegionName};

use crate::error::{incomplete, SyncError};
use crate::plan::RangeWrite;

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Cells from `origin` along `axis` up to (not including) the first empty one.
pub fn read_run(snapshot: &GridSnapshot, origin: CellRef, axis: Axis) -> Vec<String> {
    (0..)
        .map(|i| snapshot.cell(axis.step(origin, i)))
        .take_while(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Exactly `len` cells from `origin` along `axis`, blanks included.
pub fn read_span(snapshot: &GridSnapshot, origin: CellRef, axis: Axis, len: usize) -> Vec<String> {
    (0..len)
        .map(|i| snapshot.cell(axis.step(origin, i)).to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Diffing
// ---------------------------------------------------------------------------

/// Writes that turn `existing` into `target`, cell positions relative to `origin`.
///
/// Positions past the end of either side compare against `""`. Only changed
/// positions are written; adjacent changes share one range write.
pub fn diff_writes(
    region: &RegionName,
    origin: CellRef,
    axis: Axis,
    existing: &[String],
    target: &[String],
) -> Vec<RangeWrite> {
    let max_len = existing.len().max(target.len());
    let value_at = |cells: &[String], i: usize| cells.get(i).cloned().unwrap_or_default();

    let mut writes = Vec::new();
    let mut run: Option<(usize, Vec<String>)> = None;
    for i in 0..max_len {
        let want = value_at(target, i);
        if value_at(existing, i) == want {
            if let Some((start, values)) = run.take() {
                writes.push(RangeWrite::along(
                    region.clone(),
                    axis.step(origin, start),
                    axis,
                    values,
                ));
            }
            continue;
        }
        match run.as_mut() {
            Some((_, values)) => values.push(want),
            None => run = Some((i, vec![want])),
        }
    }
    if let Some((start, values)) = run {
        writes.push(RangeWrite::along(
            region.clone(),
            axis.step(origin, start),
            axis,
            values,
        ));
    }
    writes
}

/// Plan the primary value list of a layout.
///
/// No anchor means nothing to place: the plan is empty.
pub fn plan_values(
    snapshot: &GridSnapshot,
    region: &RegionName,
    anchor: Option<CellRef>,
    axis: Axis,
    values: &[String],
) -> Vec<RangeWrite> {
    let Some(anchor) = anchor else {
        return Vec::new();
    };
    let existing = read_run(snapshot, anchor, axis);
    diff_writes(region, anchor, axis, &existing, values)
}

// ---------------------------------------------------------------------------
// Lanes
// ---------------------------------------------------------------------------

/// Where a derived column's values go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lane {
    /// Cell aligned with the layout anchor.
    pub origin: CellRef,
    /// Label to add to the header line when the named header was missing.
    pub header: Option<RangeWrite>,
}

/// Resolve a rule-column locator against the layout's header line.
///
/// Fails with `ConfigurationIncomplete` when the locator cannot address a
/// lane distinct from the primary list.
pub fn resolve_lane(
    snapshot: &GridSnapshot,
    region: &RegionName,
    anchor: CellRef,
    axis: Axis,
    locator: &ColumnLocator,
) -> Result<Lane, SyncError> {
    let subject = |what: &str| format!("{region} column {what}");

    match (axis, locator) {
        (Axis::Vertical, ColumnLocator::Column(col)) => {
            if *col == anchor.col {
                return Err(incomplete(
                    subject(&rostersync_core::index_to_label(*col)),
                    "lane coincides with the primary list",
                ));
            }
            Ok(Lane {
                origin: CellRef::new(anchor.row, *col),
                header: None,
            })
        }
        (Axis::Horizontal, ColumnLocator::Column(col)) => Err(incomplete(
            subject(&rostersync_core::index_to_label(*col)),
            "column letters only address vertical layouts",
        )),
        (Axis::Vertical, ColumnLocator::Header(name)) => {
            if anchor.row <= 1 {
                return Err(incomplete(subject(name), "no header row above the anchor"));
            }
            let header_row = anchor.row - 1;
            let line: Vec<&str> = snapshot.row(header_row).iter().map(String::as_str).collect();
            match find_label(&line, name) {
                Some(col) if col == anchor.col => Err(incomplete(
                    subject(name),
                    "lane coincides with the primary list",
                )),
                Some(col) => Ok(Lane {
                    origin: CellRef::new(anchor.row, col),
                    header: None,
                }),
                None => {
                    let col = first_free(&line).max(anchor.col + 1);
                    Ok(Lane {
                        origin: CellRef::new(anchor.row, col),
                        header: Some(RangeWrite::cell(
                            region.clone(),
                            CellRef::new(header_row, col),
                            name.clone(),
                        )),
                    })
                }
            }
        }
        (Axis::Horizontal, ColumnLocator::Header(name)) => {
            if anchor.col == 0 {
                return Err(incomplete(subject(name), "no header column before the anchor"));
            }
            let header_col = anchor.col - 1;
            // Index 0 is row 1.
            let line = snapshot.column(header_col);
            match find_label(&line, name).map(|i| i + 1) {
                Some(row) if row == anchor.row => Err(incomplete(
                    subject(name),
                    "lane coincides with the primary list",
                )),
                Some(row) => Ok(Lane {
                    origin: CellRef::new(row, anchor.col),
                    header: None,
                }),
                None => {
                    let row = (first_free(&line) + 1).max(anchor.row + 1);
                    Ok(Lane {
                        origin: CellRef::new(row, anchor.col),
                        header: Some(RangeWrite::cell(
                            region.clone(),
                            CellRef::new(row, header_col),
                            name.clone(),
                        )),
                    })
                }
            }
        }
    }
}

fn find_label(line: &[&str], name: &str) -> Option<usize> {
    let wanted = name.trim().to_lowercase();
    line.iter().position(|c| c.trim().to_lowercase() == wanted)
}

/// Index after the last non-blank cell of a line.
fn first_free(line: &[&str]) -> usize {
    line.iter()
        .rposition(|c| !c.trim().is_empty())
        .map_or(0, |i| i + 1)
}
