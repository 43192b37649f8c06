//! rostersync core library — coordinates, domain types, config persistence, errors.
//!
//! - [`coord`] — column label ⇄ index codec and A1 cell references
//! - [`types`] — identities, ledger rows, layout and rule configuration
//! - [`config`] — load / save / init / upgrade of per-roster YAML
//! - [`error`] — [`ConfigError`], [`CoordinateError`]

pub mod config;
pub mod coord;
pub mod error;
pub mod types;

pub use config::{ConfigStore, FileConfigStore};
pub use coord::{index_to_label, label_to_index, CellRef};
pub use error::{ConfigError, CoordinateError};
pub use types::{
    Axis, Behavior, ColumnLocator, GridSnapshot, Identity, LayoutConfig, LedgerRow, LedgerStatus,
    RegionName, RetrySettings, RosterConfig, RosterId, Rule, RuleColumn, RuleMode, ScheduleConfig,
    Scope, SheetId,
};
