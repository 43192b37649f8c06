//! `rostersync status` — last run of every configured roster.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use rostersync_core::config;
use rostersync_core::types::RosterId;
use rostersync_sync::pipeline;

/// Arguments for `rostersync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let rosters = config::list_rosters_at(&home)
            .context("failed to list rosters; run `rostersync init` first")?;

        let rows = rosters
            .iter()
            .map(|roster| roster_status(&home, roster))
            .collect::<Vec<_>>();

        if self.json {
            print_json(rows)?;
        } else {
            print_table(rows);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum LastRun {
    Never,
    Succeeded,
    Failed,
    Unreadable,
}

#[derive(Debug, Clone, Serialize)]
struct RosterStatus {
    roster: String,
    sheet: String,
    status: LastRun,
    last_run_at: Option<DateTime<Utc>>,
    last_run_age: String,
    write_calls: usize,
    changed_cells: usize,
    detail: String,
}

#[derive(Serialize)]
struct StatusReportJson {
    summary: StatusSummaryJson,
    rosters: Vec<RosterStatus>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    rosters: usize,
    failed: usize,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "roster")]
    roster: String,
    #[tabled(rename = "sheet")]
    sheet: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "last run")]
    last_run: String,
    #[tabled(rename = "writes")]
    writes: usize,
    #[tabled(rename = "detail")]
    detail: String,
}

fn roster_status(home: &Path, roster: &RosterId) -> RosterStatus {
    let mut row = RosterStatus {
        roster: roster.0.clone(),
        sheet: String::new(),
        status: LastRun::Never,
        last_run_at: None,
        last_run_age: "never".to_string(),
        write_calls: 0,
        changed_cells: 0,
        detail: "not reconciled yet".to_string(),
    };

    match config::load_config_at(home, roster) {
        Ok(cfg) => row.sheet = cfg.sheet_id.0,
        Err(err) => {
            row.status = LastRun::Unreadable;
            row.detail = err.to_string();
            return row;
        }
    }

    let report = match pipeline::load_report_at(home, roster) {
        Ok(Some(report)) => report,
        Ok(None) => return row,
        Err(err) => {
            row.status = LastRun::Unreadable;
            row.detail = format!("last report unreadable: {err}");
            return row;
        }
    };

    row.last_run_at = Some(report.started_at);
    row.last_run_age = format_age(report.started_at, Utc::now());
    row.write_calls = report.write_calls;
    row.changed_cells = report.changed_cells;
    if report.succeeded() {
        row.status = LastRun::Succeeded;
        row.detail = format!(
            "{} matched, {} new, {} departed",
            report.matched, report.unmatched, report.departed
        );
        if !report.skipped.is_empty() {
            row.detail.push_str(&format!(", {} skipped", report.skipped.len()));
        }
    } else {
        row.status = LastRun::Failed;
        row.detail = match report.error {
            Some(err) => format!("{}: {err}", report.state),
            None => report.state.to_string(),
        };
    }
    row
}

fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

fn print_json(rows: Vec<RosterStatus>) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            rosters: rows.len(),
            failed: rows
                .iter()
                .filter(|r| matches!(r.status, LastRun::Failed | LastRun::Unreadable))
                .count(),
        },
        rosters: rows,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(rows: Vec<RosterStatus>) {
    let failed = rows
        .iter()
        .filter(|r| matches!(r.status, LastRun::Failed | LastRun::Unreadable))
        .count();
    println!(
        "rostersync v{} | {} rosters | {} failing",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        failed,
    );

    if rows.is_empty() {
        println!("No rosters configured.");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            status: format!("{} {}", indicator(row.status), label(row.status)),
            roster: row.roster,
            sheet: row.sheet,
            last_run: row.last_run_age,
            writes: row.write_calls,
            detail: row.detail,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if failed > 0 {
        println!("Run 'rostersync reconcile <roster>' to retry failing rosters.");
    }
}

fn label(status: LastRun) -> &'static str {
    match status {
        LastRun::Never => "NEVER RUN",
        LastRun::Succeeded => "OK",
        LastRun::Failed => "FAILED",
        LastRun::Unreadable => "UNREADABLE",
    }
}

fn indicator(status: LastRun) -> String {
    match status {
        LastRun::Never => "■".bright_black().bold().to_string(),
        LastRun::Succeeded => "■".green().bold().to_string(),
        LastRun::Failed => "■".red().bold().to_string(),
        LastRun::Unreadable => "■".magenta().bold().to_string(),
    }
}
