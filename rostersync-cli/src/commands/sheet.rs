//! Read-only views of a roster's sheet: `preview`, `regions`, `check`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{builder::Builder, settings::Style};

use rostersync_core::config;
use rostersync_core::index_to_label;
use rostersync_core::types::{GridSnapshot, RegionName, RosterConfig, RosterId};
use rostersync_sync::local::LocalWorkbook;
use rostersync_sync::GridStore;

#[derive(Args, Debug)]
pub struct SheetArgs {
    pub roster: String,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    pub roster: String,

    /// Region to print; defaults to the ledger region.
    #[arg(long)]
    pub region: Option<String>,
}

fn open(roster: &str) -> Result<(RosterConfig, LocalWorkbook)> {
    let home = super::home()?;
    let roster = RosterId::from(roster);
    let cfg = config::load_config_at(&home, &roster)
        .with_context(|| format!("failed to load roster '{roster}'"))?;
    let book = LocalWorkbook::open_at(&home, &cfg.sheet_id);
    Ok((cfg, book))
}

impl PreviewArgs {
    pub fn run(self) -> Result<()> {
        let (cfg, book) = open(&self.roster)?;
        let region = self
            .region
            .map(RegionName::from)
            .unwrap_or_else(|| cfg.ledger_region.clone());
        let snapshot = super::block_on(book.read_region(&region))?
            .with_context(|| format!("failed to read region '{region}'"))?;

        if snapshot.rows.iter().all(|row| row.iter().all(|c| c.is_empty())) {
            println!("Region '{region}' is empty.");
            return Ok(());
        }
        println!("{}", render(&snapshot));
        Ok(())
    }
}

/// Grid with column letters across the top and row numbers down the side.
fn render(snapshot: &GridSnapshot) -> String {
    let width = snapshot.rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut builder = Builder::default();
    builder.push_record(
        std::iter::once(String::new()).chain((0..width).map(index_to_label)),
    );
    for (i, row) in snapshot.rows.iter().enumerate() {
        builder.push_record(
            std::iter::once((i + 1).to_string())
                .chain((0..width).map(|c| row.get(c).cloned().unwrap_or_default())),
        );
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

pub fn regions(args: SheetArgs) -> Result<()> {
    let (cfg, book) = open(&args.roster)?;
    let regions = super::block_on(book.list_regions())?
        .with_context(|| format!("failed to list regions of sheet '{}'", cfg.sheet_id))?;

    if regions.is_empty() {
        println!("Sheet '{}' has no regions yet.", cfg.sheet_id);
        return Ok(());
    }
    for region in regions {
        let mut roles = Vec::new();
        if region == cfg.ledger_region {
            roles.push("ledger".to_string());
        }
        if let Some(layout) = cfg.layouts.iter().find(|l| l.region == region) {
            roles.push(format!("layout {}", layout.axis));
        }
        if roles.is_empty() {
            println!("{region}");
        } else {
            println!("{region}  {}", format!("({})", roles.join(", ")).bright_black());
        }
    }
    Ok(())
}

pub fn check(args: SheetArgs) -> Result<()> {
    let (cfg, book) = open(&args.roster)?;
    let regions = super::block_on(book.list_regions())?
        .with_context(|| format!("sheet '{}' is not reachable", cfg.sheet_id))?;
    println!(
        "{} sheet '{}' reachable ({} regions)",
        "✓".green().bold(),
        cfg.sheet_id,
        regions.len()
    );

    if regions.contains(&cfg.ledger_region) {
        println!("  ✓  ledger region '{}'", cfg.ledger_region);
    } else {
        println!(
            "  ·  ledger region '{}' will be created on first reconcile",
            cfg.ledger_region
        );
    }

    for layout in &cfg.layouts {
        let problem = if !regions.contains(&layout.region) {
            Some("region missing from sheet".to_string())
        } else if layout.anchor().is_none() {
            Some("no anchor cell".to_string())
        } else {
            None
        };
        match problem {
            Some(reason) => println!(
                "  {}  layout '{}': {reason}",
                "!".yellow().bold(),
                layout.region
            ),
            None => println!("  ✓  layout '{}'", layout.region),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_labels_rows_and_columns() {
        let out = render(&GridSnapshot::from_strs(&[&["id", "name"], &["1"]]));
        assert!(out.contains('A') && out.contains('B'));
        assert!(out.contains("name"));
        assert!(out.lines().any(|l| l.contains(" 2 ")));
    }
}
