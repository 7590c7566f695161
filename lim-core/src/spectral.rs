//! Economic eigendecomposition of a kinship covariance.
//!
//! `K = Q0 diag(S0) Q0' + Q1 Q1'` once variance weights are applied to
//! the two blocks. Q0 spans the retained eigenvectors (r columns), Q1 the
//! orthogonal complement (n - r columns).

use lim_linalg::decomposition::symmetric_eigen;
use lim_linalg::DenseMatrix;

use crate::config::InferenceConfig;
use crate::error::{InferenceError, Result};

/// Validated `(Q0, Q1, S0)` triple.
#[derive(Debug, Clone)]
pub struct SpectralCovariance {
    q0: DenseMatrix,
    q1: DenseMatrix,
    s0: Vec<f64>,
}

impl SpectralCovariance {
    /// Validate and wrap an already computed decomposition.
    ///
    /// Fails on non-finite entries, non-positive eigenvalues, a condition
    /// number above `config.max_condition`, or inconsistent dimensions.
    pub fn new(
        q0: DenseMatrix,
        q1: DenseMatrix,
        s0: Vec<f64>,
        config: &InferenceConfig,
    ) -> Result<Self> {
        let n = q0.nrows();
        if q1.nrows() != n {
            return Err(InferenceError::SampleCountMismatch {
                what: "Q1 rows",
                expected: n,
                got: q1.nrows(),
            });
        }
        if q0.ncols() != s0.len() {
            return Err(InferenceError::SampleCountMismatch {
                what: "S0 length",
                expected: q0.ncols(),
                got: s0.len(),
            });
        }
        if q0.ncols() + q1.ncols() != n {
            return Err(InferenceError::SampleCountMismatch {
                what: "Q0 and Q1 columns",
                expected: n,
                got: q0.ncols() + q1.ncols(),
            });
        }
        if s0.is_empty() {
            return Err(InferenceError::NotPositiveDefinite {
                min_eigenvalue: 0.0,
            });
        }
        if !q0.is_finite() || !q1.is_finite() || s0.iter().any(|s| !s.is_finite()) {
            return Err(InferenceError::NonFiniteSpectrum);
        }

        let min = s0.iter().copied().fold(f64::INFINITY, f64::min);
        let max = s0.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if min <= 0.0 {
            return Err(InferenceError::NotPositiveDefinite {
                min_eigenvalue: min,
            });
        }
        let condition = max / min;
        if condition > config.max_condition {
            return Err(InferenceError::IllConditioned {
                condition,
                limit: config.max_condition,
            });
        }

        Ok(Self { q0, q1, s0 })
    }

    /// Decompose a symmetric kinship matrix. Eigenvalues above
    /// `sqrt(eps) * max` are kept in `(Q0, S0)`; the rest span Q1.
    pub fn from_kinship(kinship: &DenseMatrix, config: &InferenceConfig) -> Result<Self> {
        if !kinship.is_finite() {
            return Err(InferenceError::NonFiniteSpectrum);
        }
        let eig = symmetric_eigen(kinship)?;
        let n = kinship.nrows();
        let max = eig.values.iter().copied().fold(0.0_f64, f64::max);
        let threshold = f64::EPSILON.sqrt() * max;

        let (keep, drop): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| eig.values[i] > threshold);
        let s0 = keep.iter().map(|&i| eig.values[i]).collect();
        let q0 = eig.vectors.select_cols(&keep);
        let q1 = eig.vectors.select_cols(&drop);
        Self::new(q0, q1, s0, config)
    }

    /// Number of samples n.
    pub fn nsamples(&self) -> usize {
        self.q0.nrows()
    }

    /// Number of retained eigenpairs r.
    pub fn rank(&self) -> usize {
        self.s0.len()
    }

    pub fn q0(&self) -> &DenseMatrix {
        &self.q0
    }

    pub fn q1(&self) -> &DenseMatrix {
        &self.q1
    }

    pub fn s0(&self) -> &[f64] {
        &self.s0
    }

    /// Diagonal of `Q0 diag(S0) Q0'`.
    pub fn diag_q0sq0(&self) -> Vec<f64> {
        let n = self.nsamples();
        let mut out = vec![0.0; n];
        for (k, &s) in self.s0.iter().enumerate() {
            for (i, o) in out.iter_mut().enumerate() {
                let q = self.q0.get(i, k);
                *o += q * q * s;
            }
        }
        out
    }

    /// Dense `Q0 diag(S0) Q0'`.
    pub fn kinship(&self) -> DenseMatrix {
        self.q0.scale_cols(&self.s0).mat_mul(&self.q0.transpose())
    }
}
