//! `rostersync column add` — derived columns computed from group membership.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use rostersync_core::config;
use rostersync_core::types::{ColumnLocator, RosterId, RuleColumn};

use crate::{BehaviorArg, RuleArg};

#[derive(Subcommand, Debug)]
pub enum ColumnCommand {
    /// Add or replace the rule column for a locator.
    Add(ColumnAddArgs),
}

#[derive(Args, Debug)]
pub struct ColumnAddArgs {
    pub roster: String,

    /// A single letter `A`-`Z` for a fixed column, otherwise a header label.
    #[arg(long)]
    pub locator: String,

    /// `MODE:VALUE:g1,g2`; repeat for several rules, evaluated in order.
    #[arg(long = "rule", required = true)]
    pub rules: Vec<RuleArg>,

    /// `first` keeps the first match, `combine` joins all matches.
    #[arg(long)]
    pub behavior: Option<BehaviorArg>,
}

pub fn run(command: ColumnCommand) -> Result<()> {
    match command {
        ColumnCommand::Add(args) => add(args),
    }
}

fn add(args: ColumnAddArgs) -> Result<()> {
    let home = super::home()?;
    let roster = RosterId::from(args.roster.as_str());
    let mut cfg = config::load_config_at(&home, &roster)
        .with_context(|| format!("failed to load roster '{roster}'"))?;

    let locator = args.locator.trim().to_string();
    let column = RuleColumn {
        locator: locator.clone(),
        rules: args.rules.into_iter().map(|r| r.0).collect(),
        behavior: args.behavior.map(|b| b.0).unwrap_or_default(),
    };
    let rule_count = column.rules.len();

    match cfg.rule_columns.iter_mut().find(|c| c.locator == locator) {
        Some(existing) => *existing = column,
        None => cfg.rule_columns.push(column),
    }
    config::save_config_at(&home, &roster, &cfg)
        .with_context(|| format!("failed to save roster '{roster}'"))?;

    let target = match ColumnLocator::parse(&locator) {
        ColumnLocator::Column(_) => format!("column {locator}"),
        ColumnLocator::Header(label) => format!("header '{label}'"),
    };
    println!("✓ Rule column for {target} with {rule_count} rule(s)");
    Ok(())
}
