//! Covariate whitening and hyperparameter seeding.

use tracing::debug;

use lim_linalg::decomposition::{lstsq, thin_svd};
use lim_linalg::DenseMatrix;

use super::engine::EpEngine;
use crate::error::{InferenceError, Result};
use crate::fastlmm::FastLmm;

/// Decorrelated covariates `tM = U S^{1/2}` from the thin SVD
/// `M = U S V'`, keeping only singular values above `sqrt(eps) * max`.
///
/// `M beta = tM tbeta` with `tbeta = S^{1/2} V' beta`, and the
/// minimum-norm `beta = V S^{-1/2} tbeta`.
#[derive(Debug, Clone)]
pub struct Whitening {
    whitened: DenseMatrix,
    v: DenseMatrix,
    sqrt_s: Vec<f64>,
}

impl Whitening {
    pub fn new(covariates: &DenseMatrix) -> Result<Self> {
        let svd = thin_svd(covariates)?;
        let max = svd.s.iter().copied().fold(0.0_f64, f64::max);
        let threshold = f64::EPSILON.sqrt() * max;
        let keep: Vec<usize> = (0..svd.s.len()).filter(|&k| svd.s[k] > threshold).collect();
        let sqrt_s: Vec<f64> = keep.iter().map(|&k| svd.s[k].sqrt()).collect();
        let whitened = svd.u.select_cols(&keep).scale_cols(&sqrt_s);
        let v = svd.v.select_cols(&keep);
        Ok(Self {
            whitened,
            v,
            sqrt_s,
        })
    }

    /// Number of retained whitened columns.
    pub fn ncols(&self) -> usize {
        self.sqrt_s.len()
    }

    pub fn whitened(&self) -> &DenseMatrix {
        &self.whitened
    }

    pub fn to_beta(&self, tbeta: &[f64]) -> Vec<f64> {
        let scaled: Vec<f64> = tbeta.iter().zip(&self.sqrt_s).map(|(t, s)| t / s).collect();
        self.v.mat_vec(&scaled)
    }

    pub fn to_tbeta(&self, beta: &[f64]) -> Vec<f64> {
        self.v
            .t_mat_vec(beta)
            .iter()
            .zip(&self.sqrt_s)
            .map(|(x, s)| x * s)
            .collect()
    }
}

impl EpEngine<'_> {
    /// Seed `(v, delta, tbeta)` from a FastLMM fit of the latent proxy.
    pub(super) fn initialize(&mut self) -> Result<()> {
        let latent = self.family.latent_proxy();
        let mut flmm = FastLmm::new(
            &latent,
            self.whitening.whitened(),
            self.spectral,
            self.config.clone(),
        )?;
        flmm.learn()?;
        let gv = flmm.genetic_variance()?;
        let nv = flmm.environmental_variance()?;
        let (v, delta) = self.family.initial_variances(gv, nv, &self.config);

        let tbeta = if self.whitening.ncols() == 0 {
            Vec::new()
        } else {
            lstsq(self.whitening.whitened(), &flmm.mean()?)
                .map_err(|_| InferenceError::DegenerateCovariates)?
        };

        debug!(
            "EP initial state: v={:.4e}, delta={:.4e} (FastLMM gv={:.4e}, nv={:.4e})",
            v, delta, gv, nv
        );
        self.set_v(v)?;
        self.set_delta(delta)?;
        self.set_tbeta(tbeta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitening_preserves_mean() {
        let m = DenseMatrix::from_row_major(4, 2, &[1.0, 0.5, 1.0, -0.3, 1.0, 2.0, 1.0, 0.1]);
        let w = Whitening::new(&m).unwrap();
        assert_eq!(w.ncols(), 2);
        let beta = [0.7, -1.2];
        let tbeta = w.to_tbeta(&beta);
        let a = m.mat_vec(&beta);
        let b = w.whitened().mat_vec(&tbeta);
        for i in 0..4 {
            assert!((a[i] - b[i]).abs() < 1e-10);
        }
        let back = w.to_beta(&tbeta);
        assert!((back[0] - beta[0]).abs() < 1e-10);
        assert!((back[1] - beta[1]).abs() < 1e-10);
    }

    #[test]
    fn test_whitening_drops_duplicate_columns() {
        let m = DenseMatrix::from_row_major(3, 2, &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        let w = Whitening::new(&m).unwrap();
        assert_eq!(w.ncols(), 1);
        // whitened columns are orthogonal with squared norm equal to the singular value
        let g = w.whitened().t_mat_mul(w.whitened());
        assert!((g.get(0, 0) - 15.0_f64.sqrt()).abs() < 1e-10);
    }
}
