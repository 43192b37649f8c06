//! `rostersync init <roster> --sheet <id> [--ledger-region NAME]`

use std::fs;

use anyhow::{Context, Result};
use clap::Args;

use rostersync_core::config;
use rostersync_core::types::{RegionName, RosterId, SheetId};
use rostersync_sync::local::members_path_at;

/// Create a roster config bound to a sheet.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Roster id, e.g. the community's server id.
    pub roster: String,

    /// Sheet the roster reconciles into.
    #[arg(long, short = 's')]
    pub sheet: String,

    /// Region holding the identity ledger. Created on first reconcile.
    #[arg(long)]
    pub ledger_region: Option<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let roster = RosterId::from(self.roster.as_str());
        let cfg = config::init_config_at(
            &home,
            &roster,
            SheetId::from(self.sheet.as_str()),
            self.ledger_region.map(RegionName::from),
        )
        .with_context(|| format!("failed to init roster '{roster}'"))?;

        // An empty member snapshot lets the first reconcile run before any sync.
        let members = members_path_at(&home, &roster);
        if !members.exists() {
            fs::write(&members, "[]\n")
                .with_context(|| format!("failed to write {}", members.display()))?;
        }

        println!(
            "✓ Roster '{}' bound to sheet '{}' (ledger region '{}')",
            roster, cfg.sheet_id, cfg.ledger_region
        );
        println!("  Saved to: ~/.rostersync/rosters/{roster}.yaml");
        println!("  Members:  ~/.rostersync/rosters/{roster}.members.json");
        Ok(())
    }
}
