//! `rostersync layout add` — place the active identity list in a region.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use rostersync_core::config;
use rostersync_core::types::{LayoutConfig, RegionName, RosterId, Scope};
use rostersync_core::CellRef;

use crate::AxisArg;

#[derive(Subcommand, Debug)]
pub enum LayoutCommand {
    /// Add or replace the layout for a region.
    Add(LayoutAddArgs),
}

#[derive(Args, Debug)]
pub struct LayoutAddArgs {
    pub roster: String,

    /// Region (worksheet) the names are written into.
    #[arg(long)]
    pub region: String,

    /// First cell of the list, in A1 form.
    #[arg(long)]
    pub anchor: CellRef,

    /// Direction the list extends from the anchor.
    #[arg(long, default_value = "vertical")]
    pub axis: AxisArg,

    /// Only place identities holding all of these group ids.
    #[arg(long, value_delimiter = ',')]
    pub groups: Vec<String>,
}

pub fn run(command: LayoutCommand) -> Result<()> {
    match command {
        LayoutCommand::Add(args) => add(args),
    }
}

fn add(args: LayoutAddArgs) -> Result<()> {
    let home = super::home()?;
    let roster = RosterId::from(args.roster.as_str());
    let mut cfg = config::load_config_at(&home, &roster)
        .with_context(|| format!("failed to load roster '{roster}'"))?;

    let region = RegionName::from(args.region.as_str());
    let mut layout = LayoutConfig::new(region.clone(), args.anchor, args.axis.0);
    let groups: Vec<String> = args
        .groups
        .into_iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect();
    if !groups.is_empty() {
        layout.scope = Scope::GroupFiltered;
        layout.required_group_ids = groups;
    }

    let replaced = match cfg.layouts.iter_mut().find(|l| l.region == region) {
        Some(existing) => {
            *existing = layout;
            true
        }
        None => {
            cfg.layouts.push(layout);
            false
        }
    };
    config::save_config_at(&home, &roster, &cfg)
        .with_context(|| format!("failed to save roster '{roster}'"))?;

    println!(
        "✓ {} layout '{}' at {} ({})",
        if replaced { "Replaced" } else { "Added" },
        region,
        args.anchor,
        args.axis
    );
    Ok(())
}
