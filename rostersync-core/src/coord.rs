//! Spreadsheet coordinate codec.
//!
//! Columns are zero-based internally and rendered as bijective base-26
//! letter labels (`A`..`Z`, `AA`..`AZ`, `BA`, …). Rows are one-based, as
//! they appear to a human reading the sheet.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoordinateError;

/// Convert a zero-based column index into its letter label.
///
/// `0 → "A"`, `25 → "Z"`, `26 → "AA"`, `701 → "ZZ"`, `702 → "AAA"`.
pub fn index_to_label(idx: usize) -> String {
    let mut letters = Vec::new();
    let mut n = idx;
    loop {
        letters.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Signed front-end for [`index_to_label`], for values typed by an operator.
pub fn checked_index_to_label(idx: i64) -> Result<String, CoordinateError> {
    if idx < 0 {
        return Err(CoordinateError::invalid(
            idx.to_string(),
            "column index must be non-negative",
        ));
    }
    Ok(index_to_label(idx as usize))
}

/// Convert a letter label back into a zero-based column index.
///
/// Lowercase letters are accepted. Empty labels, non-letters and labels
/// too long to fit a `usize` are rejected.
pub fn label_to_index(label: &str) -> Result<usize, CoordinateError> {
    if label.is_empty() {
        return Err(CoordinateError::invalid(label, "column label is empty"));
    }
    let mut result: usize = 0;
    for ch in label.chars() {
        if !ch.is_ascii_alphabetic() {
            return Err(CoordinateError::invalid(
                label,
                "column label must contain only letters A-Z",
            ));
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A' + 1) as usize;
        result = result
            .checked_mul(26)
            .and_then(|r| r.checked_add(digit))
            .ok_or_else(|| CoordinateError::invalid(label, "column label is too long"))?;
    }
    Ok(result - 1)
}

/// A single cell address: one-based row, zero-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Parse an A1-style reference such as `B2` or `aa10`.
    pub fn parse(input: &str) -> Result<Self, CoordinateError> {
        let trimmed = input.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| CoordinateError::invalid(input, "cell reference has no row number"))?;
        let (letters, digits) = trimmed.split_at(split);
        let col = label_to_index(letters)?;
        let row: usize = digits
            .parse()
            .map_err(|_| CoordinateError::invalid(input, "row must be a positive integer"))?;
        if row == 0 {
            return Err(CoordinateError::invalid(input, "rows are numbered from 1"));
        }
        Ok(Self { row, col })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", index_to_label(self.col), self.row)
    }
}

impl FromStr for CellRef {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
