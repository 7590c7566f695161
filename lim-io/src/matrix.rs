//! Plain-text numeric matrices (kinship and candidate columns).
//!
//! One row per line, fields separated by whitespace or tabs. Blank lines
//! and lines starting with `#` are ignored.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;

use lim_linalg::DenseMatrix;

/// Read a numeric matrix; every row must have the same number of fields.
pub fn read_matrix(path: &Path) -> Result<DenseMatrix> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read matrix file: {}", path.display()))?;
    let matrix = parse_matrix(&contents)
        .with_context(|| format!("Malformed matrix file: {}", path.display()))?;
    debug!(
        "Read {} x {} matrix from {}",
        matrix.nrows(),
        matrix.ncols(),
        path.display()
    );
    Ok(matrix)
}

fn parse_matrix(contents: &str) -> Result<DenseMatrix> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|s| {
                s.parse::<f64>()
                    .with_context(|| format!("Line {}: invalid number '{}'", line_num + 1, s))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(first) = rows.first() {
            if row.len() != first.len() {
                bail!(
                    "Line {} has {} fields, expected {}",
                    line_num + 1,
                    row.len(),
                    first.len()
                );
            }
        }
        rows.push(row);
    }
    if rows.is_empty() {
        bail!("No matrix rows found");
    }
    Ok(DenseMatrix::from_rows(&rows))
}
