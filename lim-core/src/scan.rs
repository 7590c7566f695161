//! Likelihood-ratio statistics over a candidate scan.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{InferenceError, Result};

/// Evidence of the covariates-only model and of every candidate model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub null_lml: f64,
    pub lmls: Vec<f64>,
    pub effect_sizes: Vec<f64>,
}

/// One candidate's likelihood-ratio test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrtStat {
    /// `2 (lml_alt - lml_null)`, clamped at 0.
    pub lrt: f64,
    /// Chi-square(1) upper tail of `lrt`.
    pub pvalue: f64,
}

impl ScanResult {
    pub fn len(&self) -> usize {
        self.lmls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lmls.is_empty()
    }

    pub fn lrt(&self) -> Result<Vec<LrtStat>> {
        let chi2 = ChiSquared::new(1.0)
            .map_err(|e| InferenceError::Optimization(format!("chi-square distribution: {}", e)))?;
        Ok(self
            .lmls
            .iter()
            .map(|&alt| {
                let lrt = (2.0 * (alt - self.null_lml)).max(0.0);
                LrtStat {
                    lrt,
                    pvalue: chi2.sf(lrt),
                }
            })
            .collect())
    }
}
