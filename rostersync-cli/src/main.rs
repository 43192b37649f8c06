//! rostersync — keep spreadsheet rosters in step with community membership.
//!
//! # Usage
//!
//! ```text
//! rostersync init <roster> --sheet <id> [--ledger-region NAME]
//! rostersync config show <roster> [--json]
//! rostersync layout add <roster> --region NAME --anchor B2 [--axis vertical|horizontal] [--groups g1,g2]
//! rostersync column add <roster> --locator L --rule MODE:VALUE:g1,g2 ... [--behavior first|combine]
//! rostersync coord <label | index | A1>
//! rostersync reconcile <roster> [--dry-run] [--json]
//! rostersync preview <roster> [--region NAME]
//! rostersync regions <roster>
//! rostersync check <roster>
//! rostersync status [--json]
//! rostersync daemon start|stop|status|trigger|run-status|notify
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    column::ColumnCommand,
    config::ConfigCommand,
    coord::CoordArgs,
    daemon::DaemonCommand,
    init::InitArgs,
    layout::LayoutCommand,
    reconcile::ReconcileArgs,
    sheet::{PreviewArgs, SheetArgs},
    status::StatusArgs,
};
use rostersync_core::types::{Axis, Behavior, Rule, RuleMode};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "rostersync",
    version,
    about = "Reconcile community rosters with spreadsheet regions",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a roster config bound to a sheet.
    Init(InitArgs),

    /// Inspect a roster config.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Manage where identity lists are placed.
    Layout {
        #[command(subcommand)]
        command: LayoutCommand,
    },

    /// Manage group-driven derived columns.
    Column {
        #[command(subcommand)]
        command: ColumnCommand,
    },

    /// Convert between column labels, indices and A1 references.
    Coord(CoordArgs),

    /// Run one reconciliation for a roster.
    Reconcile(ReconcileArgs),

    /// Print the cells of a region.
    Preview(PreviewArgs),

    /// List the regions of a roster's sheet.
    Regions(SheetArgs),

    /// Verify that a roster's sheet is reachable and its config resolvable.
    Check(SheetArgs),

    /// Show the last run of every roster.
    Status(StatusArgs),

    /// Run or talk to the background scheduler.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared argument parsers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct AxisArg(pub Axis);

impl FromStr for AxisArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vertical" | "v" => Ok(Self(Axis::Vertical)),
            "horizontal" | "h" => Ok(Self(Axis::Horizontal)),
            other => Err(format!(
                "unknown axis '{other}'; expected: vertical, horizontal"
            )),
        }
    }
}

impl fmt::Display for AxisArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BehaviorArg(pub Behavior);

impl FromStr for BehaviorArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(Self(Behavior::First)),
            "combine" => Ok(Self(Behavior::Combine)),
            other => Err(format!(
                "unknown behavior '{other}'; expected: first, combine"
            )),
        }
    }
}

/// `MODE:VALUE:g1,g2`, e.g. `string:Officer:123,456` or `truefalse::123`.
#[derive(Debug, Clone)]
pub struct RuleArg(pub Rule);

impl FromStr for RuleArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (mode, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("rule '{s}' is not MODE:VALUE:GROUPS"))?;
        let (value, groups) = rest
            .rsplit_once(':')
            .ok_or_else(|| format!("rule '{s}' is not MODE:VALUE:GROUPS"))?;

        let mode = match mode.to_ascii_lowercase().as_str() {
            "string" => RuleMode::String,
            "truefalse" => RuleMode::TrueFalse,
            other => {
                return Err(format!(
                    "unknown rule mode '{other}'; expected: string, truefalse"
                ))
            }
        };
        let group_ids: Vec<&str> = groups
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .collect();
        if group_ids.is_empty() {
            return Err(format!("rule '{s}' names no group ids"));
        }

        Ok(Self(match mode {
            RuleMode::String => Rule::text(value, group_ids),
            RuleMode::TrueFalse => Rule::flag(group_ids),
        }))
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
        Commands::Layout { command } => commands::layout::run(command),
        Commands::Column { command } => commands::column::run(command),
        Commands::Coord(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
        Commands::Preview(args) => args.run(),
        Commands::Regions(args) => commands::sheet::regions(args),
        Commands::Check(args) => commands::sheet::check(args),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_arg_parses_text_and_flag_rules() {
        let RuleArg(rule) = "string:Officer:g1, g2".parse().unwrap();
        assert_eq!(rule.mode, RuleMode::String);
        assert_eq!(rule.value, "Officer");
        assert_eq!(rule.group_ids.len(), 2);

        let RuleArg(rule) = "truefalse::g1".parse().unwrap();
        assert_eq!(rule.mode, RuleMode::TrueFalse);
        assert!(rule.value.is_empty());
    }

    #[test]
    fn rule_value_may_contain_colons() {
        let RuleArg(rule) = "string:Lead: Raids:g1".parse().unwrap();
        assert_eq!(rule.value, "Lead: Raids");
    }

    #[test]
    fn rule_arg_rejects_bad_input() {
        assert!("string:Officer".parse::<RuleArg>().is_err());
        assert!("regex:x:g1".parse::<RuleArg>().is_err());
        assert!("string:x:".parse::<RuleArg>().is_err());
    }
}
