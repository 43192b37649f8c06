//! Shared reconcile entrypoint used by CLI and daemon.
//!
//! Wires a roster's config to the file-backed adapters, runs the
//! orchestrator and keeps the last report under `runs/<roster>.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rostersync_core::config::{root_at, ConfigStore, FileConfigStore};
use rostersync_core::RosterId;

use crate::error::{io_err, SyncError};
use crate::local::{LocalRoster, LocalWorkbook};
use crate::reconcile::{reconcile, RunOptions, RunReport};

/// `<home>/.rostersync/runs/<roster>.json` — pure, no I/O.
pub fn report_path_at(home: &Path, roster: &RosterId) -> PathBuf {
    root_at(home).join("runs").join(format!("{}.json", roster.0))
}

/// Reconcile one roster against its local sheet, reading config from the
/// YAML files under `home`.
pub async fn run_roster_at(
    home: &Path,
    roster: &RosterId,
    opts: RunOptions,
) -> Result<RunReport, SyncError> {
    run_roster_with(&FileConfigStore::new(home), home, roster, opts).await
}

/// Reconcile one roster with config taken from `configs`.
///
/// Without an explicit deadline in `opts` the roster's run budget applies.
/// Config errors surface as `Err`; remote failures come back inside the
/// report. Non-dry runs overwrite the stored last report.
pub async fn run_roster_with(
    configs: &dyn ConfigStore,
    home: &Path,
    roster: &RosterId,
    mut opts: RunOptions,
) -> Result<RunReport, SyncError> {
    let cfg = configs.get_config(roster)?;
    if opts.deadline.is_none() {
        opts = opts.within_budget(Duration::from_secs(cfg.schedule.run_budget_seconds));
    }
    let grid = LocalWorkbook::open_at(home, &cfg.sheet_id);
    let source = LocalRoster::at(home);
    let dry_run = opts.dry_run;

    let report = reconcile(roster, &cfg, &grid, &source, opts).await;
    if !dry_run {
        save_report_at(home, &report)?;
    }
    Ok(report)
}

/// Atomically store a report: `.tmp` sibling then rename.
pub fn save_report_at(home: &Path, report: &RunReport) -> Result<(), SyncError> {
    let path = report_path_at(home, &report.roster);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// The last stored report, or `None` if the roster never ran.
pub fn load_report_at(home: &Path, roster: &RosterId) -> Result<Option<RunReport>, SyncError> {
    let path = report_path_at(home, roster);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}
