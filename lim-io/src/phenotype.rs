//! TSV phenotype and covariate file parser.
//!
//! Reads tab/space-delimited files with a header row, a sample ID column,
//! an outcome column, an optional trials column (binomial outcomes) and
//! covariate columns. Rows with any missing field are dropped by
//! [`PhenotypeData::complete_cases`].

use std::path::Path;

use anyhow::{bail, Context, Result};

use lim_linalg::DenseMatrix;

/// Parsed phenotype data for all samples.
#[derive(Debug, Clone)]
pub struct PhenotypeData {
    /// Sample IDs in file order.
    pub sample_ids: Vec<String>,
    /// Outcome values (NaN for missing).
    pub outcome: Vec<f64>,
    /// Trials per sample, when a trials column was requested.
    pub trials: Option<Vec<f64>>,
    /// Covariate matrix: covariates[i][j] = sample i, covariate j.
    pub covariates: Vec<Vec<f64>>,
    /// Covariate column names.
    pub covariate_names: Vec<String>,
}

/// Column selection for [`parse_phenotype_file`].
#[derive(Debug, Clone)]
pub struct PhenotypeColumns<'a> {
    pub sample_id: &'a str,
    pub outcome: &'a str,
    pub trials: Option<&'a str>,
    pub covariates: &'a [String],
}

/// Parse a phenotype/covariate file.
///
/// The delimiter is a tab if the header contains one, otherwise runs of
/// spaces. `NA`, `.`, `-`, `NaN` and empty fields are missing.
pub fn parse_phenotype_file(path: &Path, columns: &PhenotypeColumns<'_>) -> Result<PhenotypeData> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read phenotype file: {}", path.display()))?;

    let mut lines = contents.lines();
    let header_line = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty phenotype file"))?;

    let tabbed = header_line.contains('\t');
    let split = |line: &str| -> Vec<String> {
        if tabbed {
            line.split('\t').map(|s| s.trim().to_string()).collect()
        } else {
            line.split_whitespace().map(str::to_string).collect()
        }
    };

    let headers = split(header_line);
    let find = |name: &str, what: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow::anyhow!("{} column '{}' not found in header", what, name))
    };

    let id_idx = find(columns.sample_id, "Sample ID")?;
    let outcome_idx = find(columns.outcome, "Outcome")?;
    let trials_idx = columns.trials.map(|t| find(t, "Trials")).transpose()?;
    let covar_indices: Vec<usize> = columns
        .covariates
        .iter()
        .map(|name| find(name, "Covariate"))
        .collect::<Result<Vec<_>>>()?;

    let required = id_idx.max(outcome_idx).max(trials_idx.unwrap_or(0));
    let mut sample_ids = Vec::new();
    let mut outcome = Vec::new();
    let mut trials = trials_idx.map(|_| Vec::new());
    let mut covariates = Vec::new();

    for (line_num, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split(line);
        if fields.len() <= required {
            bail!(
                "Line {} has too few fields (expected at least {})",
                line_num + 2,
                required + 1
            );
        }

        sample_ids.push(fields[id_idx].clone());
        outcome.push(parse_value(&fields[outcome_idx]));
        if let (Some(t), Some(idx)) = (trials.as_mut(), trials_idx) {
            t.push(parse_value(&fields[idx]));
        }

        let row_covars = covar_indices
            .iter()
            .map(|&ci| fields.get(ci).map_or(f64::NAN, |f| parse_value(f)))
            .collect();
        covariates.push(row_covars);
    }

    Ok(PhenotypeData {
        sample_ids,
        outcome,
        trials,
        covariates,
        covariate_names: columns.covariates.to_vec(),
    })
}

/// Parse a string value to f64, treating NA/missing as NaN.
fn parse_value(s: &str) -> f64 {
    match s {
        "NA" | "na" | "Na" | "." | "" | "-" | "NaN" | "nan" => f64::NAN,
        _ => s.parse().unwrap_or(f64::NAN),
    }
}

impl PhenotypeData {
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Indices of samples with no missing outcome, trials or covariate.
    pub fn complete_cases(&self) -> Vec<usize> {
        (0..self.n_samples())
            .filter(|&i| {
                !self.outcome[i].is_nan()
                    && self.trials.as_ref().map_or(true, |t| !t[i].is_nan())
                    && self.covariates[i].iter().all(|c| !c.is_nan())
            })
            .collect()
    }

    /// Restrict to the given samples, in the given order.
    pub fn subset(&self, indices: &[usize]) -> PhenotypeData {
        PhenotypeData {
            sample_ids: indices.iter().map(|&i| self.sample_ids[i].clone()).collect(),
            outcome: indices.iter().map(|&i| self.outcome[i]).collect(),
            trials: self
                .trials
                .as_ref()
                .map(|t| indices.iter().map(|&i| t[i]).collect()),
            covariates: indices.iter().map(|&i| self.covariates[i].clone()).collect(),
            covariate_names: self.covariate_names.clone(),
        }
    }

    /// Design matrix with an intercept column followed by the covariates.
    pub fn design_matrix(&self) -> DenseMatrix {
        let p = self.covariate_names.len() + 1;
        DenseMatrix::from_fn(self.n_samples(), p, |i, j| {
            if j == 0 {
                1.0
            } else {
                self.covariates[i].get(j - 1).copied().unwrap_or(0.0)
            }
        })
    }
}
