//! `rostersync config show <roster> [--json]`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use rostersync_core::config;
use rostersync_core::types::RosterId;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the (upgraded) config of a roster.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub roster: String,

    /// Emit JSON instead of YAML.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show(args) => show(args),
    }
}

fn show(args: ShowArgs) -> Result<()> {
    let home = super::home()?;
    let roster = RosterId::from(args.roster.as_str());
    let cfg = config::load_config_at(&home, &roster)
        .with_context(|| format!("failed to load roster '{roster}'"))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&cfg).context("failed to serialize config JSON")?
        );
    } else {
        print!(
            "{}",
            serde_yaml::to_string(&cfg).context("failed to serialize config YAML")?
        );
    }
    Ok(())
}
