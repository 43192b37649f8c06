//! End-to-end reconciliation runs against the in-memory grid.

use chrono::{DateTime, TimeZone, Utc};
use rostersync_core::types::LEDGER_HEADER;
use rostersync_core::{
    Axis, Behavior, CellRef, GridSnapshot, Identity, LayoutConfig, RegionName, RosterConfig,
    RosterId, Rule, RuleColumn, Scope,
};
use rostersync_sync::memory::{CallKind, MemoryGrid, MemoryRoster};
use rostersync_sync::{reconcile, RunOptions, RunReport, RunStage, StageOutcome, StoreError};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
}

fn roster_id() -> RosterId {
    RosterId::from("guild")
}

fn ledger() -> RegionName {
    RegionName::from("Ledger")
}

fn roster_region() -> RegionName {
    RegionName::from("Roster")
}

/// Ledger + one vertical layout anchored at A2 under a `Name` header.
fn base_config() -> RosterConfig {
    let mut cfg = RosterConfig::new("sheet", "Ledger");
    cfg.layouts = vec![LayoutConfig::new(
        "Roster",
        CellRef::new(2, 0),
        Axis::Vertical,
    )];
    cfg
}

fn roster_sheet() -> GridSnapshot {
    GridSnapshot::from_strs(&[&["Name"]])
}

async fn run(
    cfg: &RosterConfig,
    grid: &MemoryGrid,
    roster: &MemoryRoster,
    now: DateTime<Utc>,
) -> RunReport {
    reconcile(&roster_id(), cfg, grid, roster, RunOptions::default().at(now)).await
}

fn ledger_row(grid: &MemoryGrid, id: &str) -> Vec<String> {
    let snap = grid.snapshot(&ledger()).expect("ledger exists");
    snap.rows
        .iter()
        .find(|r| r.first().map(String::as_str) == Some(id))
        .cloned()
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_run_with_unchanged_roster_writes_nothing() {
    init_logs();
    let mut cfg = base_config();
    cfg.rule_columns = vec![RuleColumn {
        locator: "Officer".into(),
        rules: vec![Rule::flag(["officer"])],
        behavior: Behavior::First,
    }];
    let grid = MemoryGrid::new().with_region("Roster", roster_sheet());
    let roster = MemoryRoster::new(vec![
        Identity::new("1", "Alice").with_groups(["officer"]),
        Identity::new("2", "Bob"),
    ]);

    let first = run(&cfg, &grid, &roster, at(9)).await;
    assert!(first.succeeded(), "{:?}", first.error);
    assert!(first.write_calls > 0);

    grid.clear_calls();
    let second = run(&cfg, &grid, &roster, at(10)).await;
    assert!(second.succeeded(), "{:?}", second.error);
    assert_eq!(second.write_calls, 0);
    assert!(second.plan.is_empty(), "unexpected plan: {:?}", second.plan);
    assert!(grid.write_calls().is_empty());
}

#[tokio::test]
async fn departed_identity_moves_to_left() {
    init_logs();
    let cfg = base_config();
    let grid = MemoryGrid::new().with_region("Roster", roster_sheet());
    let roster = MemoryRoster::new(vec![Identity::new("1", "Alice"), Identity::new("2", "Bob")]);

    run(&cfg, &grid, &roster, at(9)).await;
    assert_eq!(ledger_row(&grid, "2")[4], "active");

    roster.set(vec![Identity::new("1", "Alice")]);
    let report = run(&cfg, &grid, &roster, at(11)).await;
    assert!(report.succeeded());
    assert_eq!(report.departed, 1);
    assert_eq!(report.matched, 1);

    let bob = ledger_row(&grid, "2");
    assert_eq!(bob[2], "2026-03-01T09:00:00Z", "first_seen is immutable");
    assert_eq!(bob[3], "2026-03-01T11:00:00Z");
    assert_eq!(bob[4], "left");
    assert_eq!(ledger_row(&grid, "1")[3], "2026-03-01T09:00:00Z");

    let snap = grid.snapshot(&ledger()).unwrap();
    assert_eq!(snap.row(1), LEDGER_HEADER.map(String::from).as_slice());
    assert_eq!(snap.height(), 3, "one row per identity ever observed");

    let names = grid.snapshot(&roster_region()).unwrap();
    assert_eq!(names.column(0), vec!["Name", "Alice", ""]);
}

#[tokio::test]
async fn ledger_with_blank_header_gets_header_written() {
    let cfg = base_config();
    let grid = MemoryGrid::new()
        .with_region("Roster", roster_sheet())
        .with_region("Ledger", GridSnapshot::default());
    let roster = MemoryRoster::new(vec![Identity::new("1", "Alice")]);

    let report = run(&cfg, &grid, &roster, at(9)).await;
    assert!(report.succeeded(), "{:?}", report.error);
    let snap = grid.snapshot(&ledger()).unwrap();
    assert_eq!(snap.cell(CellRef::new(1, 0)), "identity_id");
    assert_eq!(snap.cell(CellRef::new(2, 1)), "Alice");
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn layout_writes_only_changed_positions() {
    init_logs();
    let cfg = base_config();
    let stamp = "2026-03-01T08:00:00Z";
    let grid = MemoryGrid::new()
        .with_region(
            "Ledger",
            GridSnapshot::from_strs(&[
                &LEDGER_HEADER,
                &["1", "Alice", stamp, stamp, "active"],
                &["2", "Bob", stamp, stamp, "active"],
                &["3", "Carol", stamp, stamp, "active"],
            ]),
        )
        .with_region(
            "Roster",
            GridSnapshot::from_strs(&[&["Name"], &["Alice"], &["Bob"], &["Carol"]]),
        );
    let roster = MemoryRoster::new(vec![Identity::new("1", "Alice"), Identity::new("4", "Dave")]);

    let report = run(&cfg, &grid, &roster, at(9)).await;
    assert!(report.succeeded(), "{:?}", report.error);

    let layout_writes: Vec<_> = grid
        .write_calls()
        .into_iter()
        .filter(|c| c.region.as_ref() == Some(&roster_region()))
        .collect();
    assert_eq!(layout_writes.len(), 1);
    assert_eq!(layout_writes[0].at, Some(CellRef::new(3, 0)));
    assert_eq!(layout_writes[0].cells, 2);

    let names = grid.snapshot(&roster_region()).unwrap();
    assert_eq!(names.column(0), vec!["Name", "Alice", "Dave", ""]);
}

#[tokio::test]
async fn group_filtered_layout_places_only_qualifying_identities() {
    let mut cfg = base_config();
    let mut officers = LayoutConfig::new("Officers", CellRef::new(1, 1), Axis::Horizontal);
    officers.scope = Scope::GroupFiltered;
    officers.required_group_ids = vec!["officer".into(), "raid".into()];
    cfg.layouts.push(officers);

    let grid = MemoryGrid::new()
        .with_region("Roster", roster_sheet())
        .with_region("Officers", GridSnapshot::default());
    let roster = MemoryRoster::new(vec![
        Identity::new("1", "Alice").with_groups(["officer", "raid"]),
        Identity::new("2", "Bob").with_groups(["officer"]),
        Identity::new("3", "Carol").with_groups(["raid", "officer", "x"]),
    ]);

    let report = run(&cfg, &grid, &roster, at(9)).await;
    assert!(report.succeeded(), "{:?}", report.error);
    let officers = grid.snapshot(&RegionName::from("Officers")).unwrap();
    assert_eq!(officers.row(1), ["", "Alice", "Carol"].map(String::from).as_slice());
}

#[tokio::test]
async fn unusable_entries_are_skipped_and_reported() {
    let mut cfg = base_config();
    let mut no_anchor = LayoutConfig::new("Roster", CellRef::new(2, 0), Axis::Vertical);
    no_anchor.anchor_row = None;
    cfg.layouts.push(no_anchor);
    cfg.layouts.push(LayoutConfig::new("Missing", CellRef::new(2, 0), Axis::Vertical));
    cfg.layouts.push(LayoutConfig::new("Across", CellRef::new(1, 1), Axis::Horizontal));
    cfg.rule_columns = vec![RuleColumn {
        locator: "C".into(),
        rules: vec![Rule::flag(["g"])],
        behavior: Behavior::First,
    }];

    let grid = MemoryGrid::new()
        .with_region("Roster", roster_sheet())
        .with_region("Across", GridSnapshot::default());
    let roster = MemoryRoster::new(vec![Identity::new("1", "Alice").with_groups(["g"])]);

    let report = run(&cfg, &grid, &roster, at(9)).await;
    assert!(report.succeeded(), "{:?}", report.error);
    let reasons: Vec<(&str, Option<&str>)> = report
        .skipped
        .iter()
        .map(|s| (s.region.0.as_str(), s.locator.as_deref()))
        .collect();
    assert_eq!(
        reasons,
        vec![("Roster", None), ("Missing", None), ("Across", Some("C"))]
    );
    // The vertical layout still gets its letter column.
    let names = grid.snapshot(&roster_region()).unwrap();
    assert_eq!(names.cell(CellRef::new(2, 2)), "true");
}

// ---------------------------------------------------------------------------
// Rule columns
// ---------------------------------------------------------------------------

async fn role_for(behavior: Behavior) -> (GridSnapshot, RunReport) {
    let mut cfg = base_config();
    cfg.rule_columns = vec![RuleColumn {
        locator: "Role".into(),
        rules: vec![Rule::text("X", ["G2"]), Rule::text("Y", ["G1"])],
        behavior,
    }];
    let grid = MemoryGrid::new().with_region("Roster", roster_sheet());
    let roster = MemoryRoster::new(vec![
        Identity::new("1", "Alice").with_groups(["G1", "G2"]),
        Identity::new("2", "Bob"),
    ]);
    let report = run(&cfg, &grid, &roster, at(9)).await;
    (grid.snapshot(&roster_region()).unwrap(), report)
}

#[tokio::test]
async fn first_behavior_takes_first_matching_rule() {
    let (sheet, report) = role_for(Behavior::First).await;
    assert!(report.succeeded(), "{:?}", report.error);
    assert_eq!(sheet.cell(CellRef::new(1, 1)), "Role", "missing header is appended");
    assert_eq!(sheet.cell(CellRef::new(2, 1)), "X");
    assert_eq!(sheet.cell(CellRef::new(3, 1)), "");
}

#[tokio::test]
async fn combine_behavior_joins_matches() {
    let (sheet, _) = role_for(Behavior::Combine).await;
    assert_eq!(sheet.cell(CellRef::new(2, 1)), "X, Y");
}

#[tokio::test]
async fn rule_lane_follows_a_shrinking_list() {
    init_logs();
    let mut cfg = base_config();
    cfg.rule_columns = vec![RuleColumn {
        locator: "Role".into(),
        rules: vec![Rule::text("Officer", ["g1"])],
        behavior: Behavior::First,
    }];
    let grid = MemoryGrid::new().with_region("Roster", roster_sheet());
    let roster = MemoryRoster::new(vec![
        Identity::new("1", "Alice").with_groups(["g1"]),
        Identity::new("2", "Bob"),
        Identity::new("3", "Carol").with_groups(["g1"]),
    ]);

    run(&cfg, &grid, &roster, at(9)).await;
    let sheet = grid.snapshot(&roster_region()).unwrap();
    assert_eq!(sheet.column(1), vec!["Role", "Officer", "", "Officer"]);

    roster.set(vec![Identity::new("2", "Bob")]);
    let report = run(&cfg, &grid, &roster, at(10)).await;
    assert!(report.succeeded(), "{:?}", report.error);

    let sheet = grid.snapshot(&roster_region()).unwrap();
    assert_eq!(sheet.column(0), vec!["Name", "Bob", "", ""]);
    assert_eq!(sheet.column(1), vec!["Role", "", "", ""]);
}

#[tokio::test]
async fn horizontal_layout_with_rule_lane_settles() {
    init_logs();
    let mut cfg = base_config();
    cfg.layouts = vec![LayoutConfig::new("Roster", CellRef::new(1, 1), Axis::Horizontal)];
    cfg.rule_columns = vec![RuleColumn {
        locator: "Role".into(),
        rules: vec![Rule::text("Off", ["g1"])],
        behavior: Behavior::First,
    }];
    let grid = MemoryGrid::new().with_region("Roster", GridSnapshot::default());
    let roster = MemoryRoster::new(vec![
        Identity::new("1", "Alice").with_groups(["g1"]),
        Identity::new("2", "Bob"),
    ]);

    let first = run(&cfg, &grid, &roster, at(9)).await;
    assert!(first.succeeded(), "{:?}", first.error);
    let sheet = grid.snapshot(&roster_region()).unwrap();
    assert_eq!(sheet.row(1), ["", "Alice", "Bob"].map(String::from).as_slice());
    assert_eq!(sheet.cell(CellRef::new(2, 0)), "Role", "label on the column before the anchor");
    assert_eq!(sheet.cell(CellRef::new(2, 1)), "Off");
    assert_eq!(sheet.cell(CellRef::new(2, 2)), "");

    grid.clear_calls();
    let second = run(&cfg, &grid, &roster, at(10)).await;
    assert!(second.succeeded(), "{:?}", second.error);
    assert_eq!(second.write_calls, 0);
    assert!(grid.write_calls().is_empty());
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let cfg = base_config();
    let grid = MemoryGrid::new().with_region("Roster", roster_sheet());
    grid.fail_next(CallKind::WriteRange, StoreError::Transient("429".into()));
    grid.fail_next(CallKind::WriteRange, StoreError::Transient("429".into()));
    let roster = MemoryRoster::new(vec![Identity::new("1", "Alice")]);

    let report = run(&cfg, &grid, &roster, at(9)).await;
    assert!(report.succeeded(), "{:?}", report.error);
    let attempts = grid
        .write_calls()
        .iter()
        .filter(|c| c.kind == CallKind::WriteRange)
        .count();
    assert_eq!(attempts, 3);
    assert_eq!(
        grid.snapshot(&roster_region()).unwrap().cell(CellRef::new(2, 0)),
        "Alice"
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_run() {
    let cfg = base_config();
    let grid = MemoryGrid::new().with_region("Roster", roster_sheet());
    for _ in 0..cfg.schedule.retry.attempts {
        grid.fail_next(CallKind::Read, StoreError::Transient("timeout".into()));
    }
    let roster = MemoryRoster::new(vec![Identity::new("1", "Alice")]);
    let report = run(&cfg, &grid, &roster, at(9)).await;

    assert_eq!(report.state, RunStage::Failed);
    // The ledger region was created then read by the layout stage.
    assert_eq!(report.outcome(RunStage::LedgerSync), Some(StageOutcome::Completed));
    assert_eq!(report.outcome(RunStage::Layout), Some(StageOutcome::Failed));
    assert!(report.error.unwrap().contains("still failing"));
}

#[tokio::test]
async fn fatal_failure_keeps_earlier_writes() {
    let cfg = base_config();
    let grid = MemoryGrid::new().with_region("Roster", roster_sheet());
    grid.fail_next(CallKind::WriteRange, StoreError::Fatal("permission denied".into()));
    let roster = MemoryRoster::new(vec![Identity::new("1", "Alice")]);

    let report = run(&cfg, &grid, &roster, at(9)).await;
    assert_eq!(report.state, RunStage::Failed);
    assert_eq!(report.outcome(RunStage::Committing), Some(StageOutcome::Failed));
    assert!(report.error.as_deref().unwrap_or("").contains("permission denied"));

    // Ledger append went through before the layout write failed.
    assert_eq!(ledger_row(&grid, "1")[1], "Alice");
    assert_eq!(
        grid.snapshot(&roster_region()).unwrap().cell(CellRef::new(2, 0)),
        ""
    );
}

#[tokio::test(start_paused = true)]
async fn expired_budget_abandons_the_run() {
    let cfg = base_config();
    let grid = MemoryGrid::new().with_region("Roster", roster_sheet());
    let roster = MemoryRoster::new(vec![Identity::new("1", "Alice")]);
    let deadline = tokio::time::Instant::now();
    tokio::time::advance(std::time::Duration::from_millis(1)).await;

    let report = reconcile(
        &roster_id(),
        &cfg,
        &grid,
        &roster,
        RunOptions::default().at(at(9)).with_deadline(deadline),
    )
    .await;
    assert_eq!(report.state, RunStage::Failed);
    assert!(report.error.unwrap().contains("run budget"));
    assert!(grid.calls().is_empty());
}
