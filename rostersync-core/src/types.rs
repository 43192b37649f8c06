//! Domain types for rostersync.
//!
//! Everything that crosses a crate boundary lives here: roster identities,
//! ledger rows, layout and rule configuration, and grid snapshots. All
//! configuration types are serializable via serde + serde_yaml.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coord::CellRef;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a roster (one reconciled membership list).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RosterId(pub String);

impl fmt::Display for RosterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RosterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RosterId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name for a region (worksheet) inside a sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionName(pub String);

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RegionName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RegionName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed identifier for the sheet (workbook) a roster writes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SheetId(pub String);

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SheetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SheetId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Roster side
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// One roster member as reported by the roster source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub group_ids: BTreeSet<String>,
    /// Whether the member is currently present. Defaults to `true` when a
    /// roster file omits it.
    #[serde(default = "default_true")]
    pub is_live: bool,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            group_ids: BTreeSet::new(),
            is_live: true,
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_ids = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn gone(mut self) -> Self {
        self.is_live = false;
        self
    }

    /// `true` if the identity holds every group in `required`.
    pub fn holds_all(&self, required: &[String]) -> bool {
        required.iter().all(|g| self.group_ids.contains(g))
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Fixed header row of the tracking region.
pub const LEDGER_HEADER: [&str; 5] = [
    "identity_id",
    "display_name",
    "first_seen",
    "last_seen",
    "status",
];

/// Lifecycle status of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    #[default]
    Active,
    Left,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Active => "active",
            LedgerStatus::Left => "left",
        }
    }

    /// Parse a status cell. Anything other than `left` counts as active, so a
    /// hand-edited or blank status cell is corrected on the next observation.
    pub fn from_cell(cell: &str) -> Self {
        if cell.trim().eq_ignore_ascii_case("left") {
            LedgerStatus::Left
        } else {
            LedgerStatus::Active
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted row of the tracking region.
///
/// Timestamps are kept as the exact cell text so that `first_seen` is carried
/// forward byte-for-byte, whatever format a human may have left in the sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub identity_id: String,
    pub display_name: String,
    pub first_seen: String,
    pub last_seen: String,
    pub status: LedgerStatus,
}

impl LedgerRow {
    pub fn observed(identity: &Identity, now: DateTime<Utc>) -> Self {
        let stamp = format_timestamp(now);
        Self {
            identity_id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            first_seen: stamp.clone(),
            last_seen: stamp,
            status: LedgerStatus::Active,
        }
    }

    /// Decode a data row. Returns `None` when the id cell is empty.
    pub fn from_cells(cells: &[String]) -> Option<Self> {
        let cell = |i: usize| cells.get(i).map(|s| s.trim().to_string()).unwrap_or_default();
        let identity_id = cell(0);
        if identity_id.is_empty() {
            return None;
        }
        Some(Self {
            identity_id,
            display_name: cell(1),
            first_seen: cell(2),
            last_seen: cell(3),
            status: LedgerStatus::from_cell(&cell(4)),
        })
    }

    pub fn to_cells(&self) -> Vec<String> {
        vec![
            self.identity_id.clone(),
            self.display_name.clone(),
            self.first_seen.clone(),
            self.last_seen.clone(),
            self.status.to_string(),
        ]
    }

    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_seen)
    }
}

/// Ledger timestamp format: RFC 3339, second precision, UTC.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn parse_timestamp(cell: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(cell.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Layout configuration
// ---------------------------------------------------------------------------

/// Direction a value list extends from its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    Vertical,
    Horizontal,
}

impl Axis {
    /// The cell `steps` positions along this axis from `origin`.
    pub fn step(&self, origin: CellRef, steps: usize) -> CellRef {
        match self {
            Axis::Vertical => CellRef::new(origin.row + steps, origin.col),
            Axis::Horizontal => CellRef::new(origin.row, origin.col + steps),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Vertical => write!(f, "vertical"),
            Axis::Horizontal => write!(f, "horizontal"),
        }
    }
}

/// Which active identities a layout places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    #[default]
    All,
    GroupFiltered,
}

/// Placement of the primary name list inside one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub region: RegionName,
    /// One-based. Layouts without an anchor are skipped.
    #[serde(default, alias = "row", skip_serializing_if = "Option::is_none")]
    pub anchor_row: Option<usize>,
    /// Zero-based.
    #[serde(default, alias = "col", skip_serializing_if = "Option::is_none")]
    pub anchor_col: Option<usize>,
    #[serde(default, alias = "direction")]
    pub axis: Axis,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_group_ids: Vec<String>,
}

impl LayoutConfig {
    pub fn new(region: impl Into<RegionName>, anchor: CellRef, axis: Axis) -> Self {
        Self {
            region: region.into(),
            anchor_row: Some(anchor.row),
            anchor_col: Some(anchor.col),
            axis,
            scope: Scope::All,
            required_group_ids: Vec::new(),
        }
    }

    pub fn anchor(&self) -> Option<CellRef> {
        match (self.anchor_row, self.anchor_col) {
            (Some(row), Some(col)) if row >= 1 => Some(CellRef::new(row, col)),
            _ => None,
        }
    }

    /// `true` if the identity passes this layout's scope filter.
    pub fn admits(&self, identity: &Identity) -> bool {
        match self.scope {
            Scope::All => true,
            Scope::GroupFiltered => identity.holds_all(&self.required_group_ids),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule columns
// ---------------------------------------------------------------------------

/// How a matching rule turns into a cell value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleMode {
    #[serde(rename = "truefalse")]
    TrueFalse,
    #[serde(rename = "string")]
    String,
}

/// A single derived-value rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub mode: RuleMode,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub group_ids: BTreeSet<String>,
}

impl Rule {
    pub fn text<I, S>(value: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: RuleMode::String,
            value: value.into(),
            group_ids: groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn flag<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: RuleMode::TrueFalse,
            value: String::new(),
            group_ids: groups.into_iter().map(Into::into).collect(),
        }
    }
}

/// Aggregation policy when several rules match one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    #[default]
    First,
    Combine,
}

/// A derived, group-driven column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleColumn {
    #[serde(alias = "name")]
    pub locator: String,
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub behavior: Behavior,
}

/// Where a rule column lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnLocator {
    /// A single uppercase letter `A`–`Z`, always a direct column reference.
    Column(usize),
    /// Any other text, resolved case-insensitively against a header line.
    Header(String),
}

impl ColumnLocator {
    pub fn parse(locator: &str) -> Self {
        let trimmed = locator.trim();
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_uppercase() => {
                ColumnLocator::Column((c as u8 - b'A') as usize)
            }
            _ => ColumnLocator::Header(trimmed.to_string()),
        }
    }
}

impl RuleColumn {
    pub fn locator(&self) -> ColumnLocator {
        ColumnLocator::parse(&self.locator)
    }
}

// ---------------------------------------------------------------------------
// Roster configuration
// ---------------------------------------------------------------------------

/// Current on-disk configuration version.
pub const CONFIG_VERSION: u32 = 2;

/// Backoff settings for transient grid-store failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

/// Scheduling knobs for the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "ScheduleConfig::default_tick")]
    pub tick_seconds: u64,
    #[serde(default = "ScheduleConfig::default_budget")]
    pub run_budget_seconds: u64,
    /// How stale `last_seen` may get for an unchanged active identity before
    /// the ledger refreshes it.
    #[serde(default = "ScheduleConfig::default_refresh")]
    pub last_seen_refresh_hours: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl ScheduleConfig {
    fn default_tick() -> u64 {
        60
    }

    fn default_budget() -> u64 {
        300
    }

    fn default_refresh() -> u64 {
        24
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_seconds: Self::default_tick(),
            run_budget_seconds: Self::default_budget(),
            last_seen_refresh_hours: Self::default_refresh(),
            retry: RetrySettings::default(),
        }
    }
}

/// Everything needed to reconcile one roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterConfig {
    pub version: u32,
    pub sheet_id: SheetId,
    pub ledger_region: RegionName,
    #[serde(default)]
    pub layouts: Vec<LayoutConfig>,
    #[serde(default)]
    pub rule_columns: Vec<RuleColumn>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl RosterConfig {
    pub fn new(sheet_id: impl Into<SheetId>, ledger_region: impl Into<RegionName>) -> Self {
        Self {
            version: CONFIG_VERSION,
            sheet_id: sheet_id.into(),
            ledger_region: ledger_region.into(),
            layouts: Vec::new(),
            rule_columns: Vec::new(),
            schedule: ScheduleConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Grid snapshot
// ---------------------------------------------------------------------------

/// The full read of one region: rows of cell strings, ragged on the right.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridSnapshot {
    pub rows: Vec<Vec<String>>,
}

impl GridSnapshot {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn from_strs(rows: &[&[&str]]) -> Self {
        Self {
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    /// Number of rows read (including trailing blank rows the store returned).
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Cell text at a one-based row and zero-based column; empty outside.
    pub fn cell(&self, at: CellRef) -> &str {
        if at.row == 0 {
            return "";
        }
        self.rows
            .get(at.row - 1)
            .and_then(|r| r.get(at.col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// The cells of a one-based row; empty slice outside.
    pub fn row(&self, row: usize) -> &[String] {
        if row == 0 {
            return &[];
        }
        self.rows.get(row - 1).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The cells of a zero-based column, top to bottom, padded.
    pub fn column(&self, col: usize) -> Vec<&str> {
        self.rows
            .iter()
            .map(|r| r.get(col).map(String::as_str).unwrap_or(""))
            .collect()
    }

    /// Overwrite one cell, growing the grid as needed.
    pub fn set(&mut self, at: CellRef, value: impl Into<String>) {
        if at.row == 0 {
            return;
        }
        if self.rows.len() < at.row {
            self.rows.resize(at.row, Vec::new());
        }
        let row = &mut self.rows[at.row - 1];
        if row.len() <= at.col {
            row.resize(at.col + 1, String::new());
        }
        row[at.col] = value.into();
    }

    /// Paste a block of rows with its top-left corner at `top_left`.
    pub fn paste(&mut self, top_left: CellRef, block: &[Vec<String>]) {
        for (dr, cells) in block.iter().enumerate() {
            for (dc, value) in cells.iter().enumerate() {
                self.set(CellRef::new(top_left.row + dr, top_left.col + dc), value.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
