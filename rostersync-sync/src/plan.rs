//! Write plan: the remote calls a run intends to make, in dispatch order.

use std::fmt;

use serde::{Deserialize, Serialize};

use rostersync_core::{Axis, CellRef, GridSnapshot, RegionName};

/// One rectangular overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeWrite {
    pub region: RegionName,
    pub top_left: CellRef,
    pub rows: Vec<Vec<String>>,
}

impl RangeWrite {
    /// A run of values laid out along `axis` starting at `top_left`.
    pub fn along(region: RegionName, top_left: CellRef, axis: Axis, values: Vec<String>) -> Self {
        let rows = match axis {
            Axis::Vertical => values.into_iter().map(|v| vec![v]).collect(),
            Axis::Horizontal => vec![values],
        };
        Self {
            region,
            top_left,
            rows,
        }
    }

    pub fn cell(region: RegionName, at: CellRef, value: impl Into<String>) -> Self {
        Self {
            region,
            top_left: at,
            rows: vec![vec![value.into()]],
        }
    }

    pub fn cell_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn bottom_right(&self) -> CellRef {
        let height = self.rows.len().max(1);
        let width = self.rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
        CellRef::new(self.top_left.row + height - 1, self.top_left.col + width - 1)
    }
}

impl fmt::Display for RangeWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.bottom_right();
        if end == self.top_left {
            write!(f, "{}!{}", self.region, self.top_left)
        } else {
            write!(f, "{}!{}:{}", self.region, self.top_left, end)
        }
    }
}

/// A single remote write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    CreateRegion {
        region: RegionName,
        header: Vec<String>,
    },
    Range(RangeWrite),
    Append {
        region: RegionName,
        row: Vec<String>,
    },
}

impl WriteOp {
    pub fn region(&self) -> &RegionName {
        match self {
            WriteOp::CreateRegion { region, .. } | WriteOp::Append { region, .. } => region,
            WriteOp::Range(w) => &w.region,
        }
    }

    pub fn cell_count(&self) -> usize {
        match self {
            WriteOp::CreateRegion { header, .. } => header.len(),
            WriteOp::Range(w) => w.cell_count(),
            WriteOp::Append { row, .. } => row.len(),
        }
    }

    /// Mirror the write into a local working copy of the region.
    pub fn apply_to(&self, snapshot: &mut GridSnapshot) {
        match self {
            WriteOp::CreateRegion { header, .. } => {
                *snapshot = GridSnapshot::new(vec![header.clone()]);
            }
            WriteOp::Range(w) => snapshot.paste(w.top_left, &w.rows),
            WriteOp::Append { row, .. } => {
                let at = CellRef::new(crate::store::next_free_row(snapshot), 0);
                snapshot.paste(at, std::slice::from_ref(row));
            }
        }
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::CreateRegion { region, .. } => write!(f, "create {region}"),
            WriteOp::Range(w) => write!(f, "write {w} ({} cells)", w.cell_count()),
            WriteOp::Append { region, row } => write!(f, "append {region} ({} cells)", row.len()),
        }
    }
}

impl From<RangeWrite> for WriteOp {
    fn from(w: RangeWrite) -> Self {
        WriteOp::Range(w)
    }
}
