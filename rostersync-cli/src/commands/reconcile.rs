//! `rostersync reconcile` — run ledger, layout and rule-column sync once.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use rostersync_core::types::RosterId;
use rostersync_sync::{pipeline, RunOptions, RunReport, WriteOp};

/// Arguments for `rostersync reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    pub roster: String,

    /// Plan every write without dispatching any.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the run report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let roster = RosterId::from(self.roster.as_str());

        let report = super::block_on(async {
            let opts = RunOptions::default().dry_run(self.dry_run);
            pipeline::run_roster_at(&home, &roster, opts).await
        })?
        .with_context(|| format!("failed to reconcile roster '{roster}'"))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize run report")?
            );
        } else {
            print_report(&report);
        }

        if let Some(err) = report.error.as_deref() {
            bail!("reconcile failed for '{roster}' during {}: {err}", report.state);
        }
        Ok(())
    }
}

fn print_report(report: &RunReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let mark = if report.succeeded() {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    let counts = if report.dry_run {
        format!("{} planned writes", report.plan.len())
    } else {
        format!(
            "{} write calls, {} cells changed",
            report.write_calls, report.changed_cells
        )
    };
    println!("{prefix}{mark} '{}' reconciled ({counts})", report.roster);
    println!(
        "  identities: {} matched, {} new, {} departed",
        report.matched, report.unmatched, report.departed
    );

    for op in &report.plan {
        let glyph = match op {
            WriteOp::CreateRegion { .. } => "+",
            WriteOp::Range(_) => "✎",
            WriteOp::Append { .. } => "↳",
        };
        if report.dry_run {
            println!("  ~  {op}");
        } else {
            println!("  {glyph}  {op}");
        }
    }

    for skipped in &report.skipped {
        let what = match &skipped.locator {
            Some(locator) => format!("{} / {locator}", skipped.region),
            None => skipped.region.to_string(),
        };
        println!("  {}  {what}: {}", "!".yellow().bold(), skipped.reason);
    }
}
