//! Reconciliation orchestrator.
//!
//! One run walks `Idle → LedgerSync → Layout → RuleColumns → Committing → Idle`
//! and lands in `Failed` if any remote call gives up. Every region is read
//! once at the start of the stage that first needs it; later stages plan
//! against a working copy that already reflects earlier planned writes.
//!
//! Ledger writes go out at the end of `LedgerSync`. Layout and rule-column
//! writes are queued and go out in order during `Committing`. Writes that
//! were acknowledged before a failure stay committed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use rostersync_core::{
    Axis, CellRef, GridSnapshot, Identity, LayoutConfig, RegionName, RetrySettings,
    RosterConfig, RosterId,
};

use crate::error::{StoreError, SyncError};
use crate::layout::{diff_writes, read_run, read_span, resolve_lane};
use crate::ledger::{header_cells, plan_writes, Ledger};
use crate::plan::{RangeWrite, WriteOp};
use crate::rules::evaluate;
use crate::store::{GridStore, RosterSource};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Orchestrator state. `Idle` is both the start and the successful end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    LedgerSync,
    Layout,
    RuleColumns,
    Committing,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStage::Idle => "idle",
            RunStage::LedgerSync => "ledger_sync",
            RunStage::Layout => "layout",
            RunStage::RuleColumns => "rule_columns",
            RunStage::Committing => "committing",
            RunStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    Failed,
    NotReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: RunStage,
    pub outcome: StageOutcome,
}

/// A layout or rule column the run could not place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub region: RegionName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    pub reason: String,
}

/// Everything a run did, or would have done in dry-run mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub roster: RosterId,
    pub state: RunStage,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    pub matched: usize,
    pub unmatched: usize,
    pub departed: usize,
    pub skipped: Vec<SkippedEntry>,
    /// Writes in dispatch order.
    pub plan: Vec<WriteOp>,
    /// Acknowledged remote write calls.
    pub write_calls: usize,
    pub changed_cells: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const STAGES: [RunStage; 4] = [
    RunStage::LedgerSync,
    RunStage::Layout,
    RunStage::RuleColumns,
    RunStage::Committing,
];

impl RunReport {
    /// A report for a run that has not started a stage yet.
    pub fn new(roster: &RosterId, dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            roster: roster.clone(),
            state: RunStage::Idle,
            dry_run,
            started_at,
            stages: STAGES
                .iter()
                .map(|&stage| StageReport {
                    stage,
                    outcome: StageOutcome::NotReached,
                })
                .collect(),
            matched: 0,
            unmatched: 0,
            departed: 0,
            skipped: Vec::new(),
            plan: Vec::new(),
            write_calls: 0,
            changed_cells: 0,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunStage::Idle && self.error.is_none()
    }

    pub fn outcome(&self, stage: RunStage) -> Option<StageOutcome> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.outcome)
    }

    fn mark(&mut self, stage: RunStage, outcome: StageOutcome) {
        if let Some(s) = self.stages.iter_mut().find(|s| s.stage == stage) {
            s.outcome = outcome;
        }
    }
}

// ---------------------------------------------------------------------------
// Options and retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Plan everything, dispatch nothing.
    pub dry_run: bool,
    /// Timestamp written into ledger rows.
    pub now: DateTime<Utc>,
    /// Checked before every remote call.
    pub deadline: Option<Instant>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            now: Utc::now(),
            deadline: None,
        }
    }
}

impl RunOptions {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `budget` from now. A budget past the clock's range means
    /// no deadline.
    pub fn within_budget(mut self, budget: Duration) -> Self {
        self.deadline = Instant::now().checked_add(budget);
        self
    }
}

/// Run one remote call, retrying transient failures with exponential backoff.
///
/// Transient failures that outlast `settings.attempts` become `RemoteFatal`.
/// The deadline is checked before every attempt.
pub async fn with_retry<T, F, Fut>(
    settings: &RetrySettings,
    deadline: Option<Instant>,
    what: &str,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = settings.attempts.max(1);
    let max_delay = Duration::from_millis(settings.max_delay_ms);
    let mut delay = Duration::from_millis(settings.base_delay_ms).min(max_delay);
    let mut attempt = 1;
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SyncError::DeadlineExceeded(what.to_string()));
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(StoreError::Transient(msg)) if attempt < attempts => {
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what,
                    attempt,
                    attempts,
                    msg,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
                attempt += 1;
            }
            Err(StoreError::Transient(msg)) => {
                return Err(SyncError::RemoteFatal(format!(
                    "{what}: still failing after {attempts} attempts: {msg}"
                )));
            }
            Err(StoreError::Fatal(msg)) => {
                return Err(SyncError::RemoteFatal(format!("{what}: {msg}")));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Reconcile one roster against its grid and report what happened.
///
/// Never returns an error: failures end the run in `Failed` with the detail
/// in [`RunReport::error`].
pub async fn reconcile(
    roster: &RosterId,
    config: &RosterConfig,
    grid: &dyn GridStore,
    source: &dyn RosterSource,
    opts: RunOptions,
) -> RunReport {
    let mut run = Run::new(roster, config, grid, source, opts);
    let result = run.drive().await;
    run.finish(result)
}

/// A layout that made it through planning, kept for its rule columns.
struct Placed<'a> {
    layout: &'a LayoutConfig,
    anchor: CellRef,
    /// Identity ids in slot order.
    eligible: Vec<String>,
    /// Slots the lanes must cover: enough to clear values of departed names.
    extent: usize,
}

struct Run<'a> {
    roster: &'a RosterId,
    config: &'a RosterConfig,
    grid: &'a dyn GridStore,
    source: &'a dyn RosterSource,
    opts: RunOptions,
    report: RunReport,
    regions: HashSet<RegionName>,
    working: HashMap<RegionName, GridSnapshot>,
    ledger: Ledger,
    live: HashMap<String, Identity>,
    placed: Vec<Placed<'a>>,
    pending: Vec<WriteOp>,
}

impl<'a> Run<'a> {
    fn new(
        roster: &'a RosterId,
        config: &'a RosterConfig,
        grid: &'a dyn GridStore,
        source: &'a dyn RosterSource,
        opts: RunOptions,
    ) -> Self {
        let report = RunReport::new(roster, opts.dry_run, opts.now);
        Self {
            roster,
            config,
            grid,
            source,
            opts,
            report,
            regions: HashSet::new(),
            working: HashMap::new(),
            ledger: Ledger::default(),
            live: HashMap::new(),
            placed: Vec::new(),
            pending: Vec::new(),
        }
    }

    async fn drive(&mut self) -> Result<(), SyncError> {
        self.enter(RunStage::LedgerSync);
        self.ledger_sync().await?;
        self.enter(RunStage::Layout);
        self.layout().await?;
        self.enter(RunStage::RuleColumns);
        self.rule_columns()?;
        self.enter(RunStage::Committing);
        self.commit().await?;
        Ok(())
    }

    fn enter(&mut self, next: RunStage) {
        let prev = self.report.state;
        if STAGES.contains(&prev) {
            self.report.mark(prev, StageOutcome::Completed);
        }
        tracing::debug!("{}: {} -> {}", self.roster, prev, next);
        self.report.state = next;
    }

    fn finish(mut self, result: Result<(), SyncError>) -> RunReport {
        match result {
            Ok(()) => {
                self.enter(RunStage::Idle);
                tracing::info!(
                    "{}: reconciled ({} write calls, {} cells{})",
                    self.roster,
                    self.report.write_calls,
                    self.report.changed_cells,
                    if self.opts.dry_run { ", dry run" } else { "" }
                );
            }
            Err(err) => {
                let stage = self.report.state;
                self.report.mark(stage, StageOutcome::Failed);
                tracing::error!("{}: run failed during {}: {}", self.roster, stage, err);
                self.report.state = RunStage::Failed;
                self.report.error = Some(err.to_string());
            }
        }
        self.report
    }

    // -- remote plumbing ---------------------------------------------------

    async fn call<T, F, Fut>(&self, what: &str, op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        with_retry(&self.config.schedule.retry, self.opts.deadline, what, op).await
    }

    async fn dispatch(&mut self, op: &WriteOp) -> Result<(), SyncError> {
        if self.opts.dry_run {
            tracing::info!("[dry-run] would {}", op);
            return Ok(());
        }
        let grid = self.grid;
        let what = op.to_string();
        match op {
            WriteOp::CreateRegion { region, header } => {
                self.call(&what, || grid.create_region(region, header)).await?
            }
            WriteOp::Range(w) => {
                self.call(&what, || grid.write_range(&w.region, w.top_left, &w.rows))
                    .await?
            }
            WriteOp::Append { region, row } => {
                self.call(&what, || grid.append_row(region, row)).await?
            }
        }
        self.report.write_calls += 1;
        tracing::debug!("{}", what);
        Ok(())
    }

    /// Add a write to the plan and mirror it into the working copy.
    fn record(&mut self, op: &WriteOp) {
        if let Some(snapshot) = self.working.get_mut(op.region()) {
            op.apply_to(snapshot);
        }
        self.report.changed_cells += op.cell_count();
        self.report.plan.push(op.clone());
    }

    fn queue(&mut self, writes: Vec<RangeWrite>) {
        for w in writes {
            let op = WriteOp::Range(w);
            self.record(&op);
            self.pending.push(op);
        }
    }

    fn skip(&mut self, region: &RegionName, locator: Option<&str>, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(
            "{}: skipping {}{}: {}",
            self.roster,
            region,
            locator.map(|l| format!(" column {l}")).unwrap_or_default(),
            reason
        );
        self.report.skipped.push(SkippedEntry {
            region: region.clone(),
            locator: locator.map(str::to_string),
            reason,
        });
    }

    async fn load_region(&mut self, region: &RegionName) -> Result<(), SyncError> {
        if self.working.contains_key(region) {
            return Ok(());
        }
        let grid = self.grid;
        let snapshot = self
            .call(&format!("read {region}"), || grid.read_region(region))
            .await?;
        self.working.insert(region.clone(), snapshot);
        Ok(())
    }

    // -- stages ------------------------------------------------------------

    async fn ledger_sync(&mut self) -> Result<(), SyncError> {
        let (grid, source, roster, config) = (self.grid, self.source, self.roster, self.config);
        let region = &config.ledger_region;

        let identities = self
            .call("list identities", || source.list_identities(roster))
            .await?;
        let regions = self.call("list regions", || grid.list_regions()).await?;
        self.regions = regions.into_iter().collect();

        if !self.regions.contains(region) {
            tracing::info!("{}: creating ledger region {}", roster, region);
            let create = WriteOp::CreateRegion {
                region: region.clone(),
                header: header_cells(),
            };
            self.dispatch(&create).await?;
            self.working
                .insert(region.clone(), GridSnapshot::new(vec![header_cells()]));
            self.report.changed_cells += create.cell_count();
            self.report.plan.push(create);
            self.regions.insert(region.clone());
        } else {
            self.load_region(region).await?;
        }

        let mut ledger = self
            .working
            .get(region)
            .map(Ledger::parse)
            .unwrap_or_default();

        let mut ops = Vec::new();
        if !ledger.header_present() {
            ops.push(WriteOp::Range(RangeWrite::along(
                region.clone(),
                CellRef::new(1, 0),
                Axis::Horizontal,
                header_cells(),
            )));
        }
        let hours = i64::try_from(config.schedule.last_seen_refresh_hours)
            .unwrap_or(i64::MAX)
            .min(MAX_REFRESH_HOURS);
        let delta = ledger.delta(&identities, self.opts.now, chrono::Duration::hours(hours));
        ops.extend(plan_writes(region, &delta.upserts));

        for op in &ops {
            self.record(op);
            self.dispatch(op).await?;
        }
        ledger.apply(&delta.upserts);

        self.report.matched = delta.matched;
        self.report.unmatched = delta.unmatched;
        self.report.departed = delta.departed;
        for identity in identities.into_iter().filter(|i| i.is_live) {
            self.live.entry(identity.id.clone()).or_insert(identity);
        }
        self.ledger = ledger;
        Ok(())
    }

    async fn layout(&mut self) -> Result<(), SyncError> {
        let config = self.config;
        let active: Vec<String> = self
            .ledger
            .active()
            .filter(|row| self.live.contains_key(&row.identity_id))
            .map(|row| row.identity_id.clone())
            .collect();

        for layout in &config.layouts {
            let region = &layout.region;
            let Some(anchor) = layout.anchor() else {
                self.skip(region, None, "layout has no anchor");
                continue;
            };
            if !self.regions.contains(region) {
                self.skip(region, None, "region does not exist");
                continue;
            }
            self.load_region(region).await?;

            let eligible: Vec<String> = active
                .iter()
                .filter(|id| self.live.get(*id).is_some_and(|i| layout.admits(i)))
                .cloned()
                .collect();
            let names: Vec<String> = eligible
                .iter()
                .filter_map(|id| self.live.get(id))
                .map(|i| i.display_name.clone())
                .collect();

            let Some(snapshot) = self.working.get(region) else {
                continue;
            };
            let existing = read_run(snapshot, anchor, layout.axis);
            let writes = diff_writes(region, anchor, layout.axis, &existing, &names);
            let extent = existing.len().max(names.len());
            tracing::debug!(
                "{}: {} places {} names ({} range writes)",
                self.roster,
                region,
                names.len(),
                writes.len()
            );
            self.queue(writes);
            self.placed.push(Placed {
                layout,
                anchor,
                eligible,
                extent,
            });
        }
        Ok(())
    }

    fn rule_columns(&mut self) -> Result<(), SyncError> {
        let config = self.config;
        let placed = std::mem::take(&mut self.placed);

        for column in &config.rule_columns {
            let locator = column.locator();
            for p in &placed {
                let region = &p.layout.region;
                let axis = p.layout.axis;
                let resolved = match self.working.get(region) {
                    Some(snapshot) => resolve_lane(snapshot, region, p.anchor, axis, &locator),
                    None => continue,
                };
                let lane = match resolved {
                    Ok(lane) => lane,
                    Err(SyncError::ConfigurationIncomplete { reason, .. }) => {
                        self.skip(region, Some(column.locator.as_str()), reason);
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                if let Some(header) = lane.header {
                    self.queue(vec![header]);
                }
                let values: Vec<String> = p
                    .eligible
                    .iter()
                    .map(|id| {
                        self.live
                            .get(id)
                            .map(|i| evaluate(&i.group_ids, &column.rules, column.behavior))
                            .unwrap_or_default()
                    })
                    .collect();
                let existing = self
                    .working
                    .get(region)
                    .map(|s| read_span(s, lane.origin, axis, p.extent))
                    .unwrap_or_default();
                let writes = diff_writes(region, lane.origin, axis, &existing, &values);
                self.queue(writes);
            }
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SyncError> {
        let pending = std::mem::take(&mut self.pending);
        for op in &pending {
            self.dispatch(op).await?;
        }
        Ok(())
    }
}

/// Upper bound keeping `chrono::Duration::hours` in range.
const MAX_REFRESH_HOURS: i64 = 24 * 365 * 100;
