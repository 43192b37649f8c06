//! `rostersync coord` — column label / index / A1 conversions.

use anyhow::{Context, Result};
use clap::Args;

use rostersync_core::{coord::checked_index_to_label, label_to_index, CellRef};

#[derive(Args, Debug)]
pub struct CoordArgs {
    /// A zero-based column index (`27`), a column label (`AB`) or a cell (`AB12`).
    #[arg(allow_hyphen_values = true)]
    pub input: String,
}

impl CoordArgs {
    pub fn run(self) -> Result<()> {
        println!("{}", convert(self.input.trim())?);
        Ok(())
    }
}

fn convert(input: &str) -> Result<String> {
    if let Ok(index) = input.parse::<i64>() {
        let label = checked_index_to_label(index).context("invalid column index")?;
        return Ok(format!("{index} → {label}"));
    }
    if input.chars().all(|c| c.is_ascii_alphabetic()) {
        let index = label_to_index(input).context("invalid column label")?;
        return Ok(format!("{input} → {index}"));
    }
    let cell = CellRef::parse(input).context("invalid cell reference")?;
    Ok(format!("{cell} → row {}, column {}", cell.row, cell.col))
}
