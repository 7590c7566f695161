//! Frozen EP approximation for fast candidate scans.
//!
//! With the sites held fixed, the EP evidence depends on the prior mean
//! `m` only through
//!
//! ```text
//! lml(m) = c + m' nom - 1/2 m' E m
//! ```
//!
//! where `E = (K + diag(1/tau))^{-1}` and `nom = C eta - A Q B^{-1} Q' (C eta)`.
//! Maximizing over the coefficients of `m = M b + x g` is a generalized
//! least-squares problem, so each candidate column `x` costs one
//! application of E plus a few dot products.

use rayon::prelude::*;
use tracing::debug;

use lim_linalg::{CholeskyDecomp, DenseMatrix};

use crate::ep::factor::SiteFactor;
use crate::ep::Whitening;
use crate::error::{InferenceError, Result};
use crate::scan::ScanResult;
use crate::util::math::dot;

/// Read-only snapshot of a converged EP state.
#[derive(Debug, Clone)]
pub struct FixedEp {
    mean_free: f64,
    factor: SiteFactor,
    q0: DenseMatrix,
    site_eta: Vec<f64>,
    /// `Q B^{-1} Q' (C eta)`.
    qb_ct: Vec<f64>,
    nom: Vec<f64>,
    degenerate_tol: f64,
}

impl FixedEp {
    pub(crate) fn from_parts(
        mean_free: f64,
        factor: SiteFactor,
        q0: DenseMatrix,
        site_eta: Vec<f64>,
        degenerate_tol: f64,
    ) -> Self {
        let ct: Vec<f64> = factor.c.iter().zip(&site_eta).map(|(c, t)| c * t).collect();
        let qb_ct = factor.qbiqt(&q0, &ct);
        let nom = ct
            .iter()
            .zip(factor.a.iter().zip(&qb_ct))
            .map(|(ct, (a, w))| ct - a * w)
            .collect();
        Self {
            mean_free,
            factor,
            q0,
            site_eta,
            qb_ct,
            nom,
            degenerate_tol,
        }
    }

    pub fn nsamples(&self) -> usize {
        self.site_eta.len()
    }

    /// Evidence terms that do not involve the prior mean.
    pub fn mean_free(&self) -> f64 {
        self.mean_free
    }

    /// Site natural means captured at snapshot time.
    pub fn site_eta(&self) -> &[f64] {
        &self.site_eta
    }

    /// `Q B^{-1} Q' (C eta)` captured at snapshot time.
    pub fn qbiqt_site(&self) -> &[f64] {
        &self.qb_ct
    }

    /// Linear coefficient of the evidence in the prior mean.
    pub fn nom(&self) -> &[f64] {
        &self.nom
    }

    fn precision_apply(&self, x: &[f64]) -> Vec<f64> {
        self.factor.precision_apply(&self.q0, x)
    }

    /// Evidence at each fixed prior mean (one mean per column).
    pub fn lmls(&self, means: &DenseMatrix) -> Result<Vec<f64>> {
        self.check_rows("means", means)?;
        Ok((0..means.ncols())
            .into_par_iter()
            .map(|j| {
                let m = means.col(j);
                let em = self.precision_apply(&m);
                self.mean_free + dot(&m, &self.nom) - 0.5 * dot(&m, &em)
            })
            .collect())
    }

    /// Best evidence and effect size for each candidate column appended to
    /// the covariates, with covariate effects re-estimated per candidate.
    ///
    /// A candidate explained by the covariates (or identically zero) gets
    /// an effect of exactly 0 and the null evidence.
    pub fn compute(&self, covariates: &DenseMatrix, candidates: &DenseMatrix) -> Result<ScanResult> {
        self.check_rows("covariates", covariates)?;
        self.check_rows("candidates", candidates)?;
        if !covariates.is_finite() || !candidates.is_finite() {
            return Err(InferenceError::DegenerateCovariates);
        }

        let null = NullFit::new(self, covariates)?;
        let degenerate_tol = self.degenerate_tol;

        let scored: Vec<(f64, f64)> = (0..candidates.ncols())
            .into_par_iter()
            .map(|j| {
                let x = candidates.col(j);
                let ex = self.precision_apply(&x);
                let x_ex = dot(&x, &ex);
                let d = null.etm.t_mat_vec(&x);
                let (s, nom_x) = match &null.chol {
                    Some(chol) => {
                        let zd = chol.solve(&d);
                        (x_ex - dot(&d, &zd), dot(&x, &self.nom) - dot(&d, &null.b0))
                    }
                    None => (x_ex, dot(&x, &self.nom)),
                };
                if !(x_ex > f64::MIN_POSITIVE) || s <= degenerate_tol * x_ex {
                    (null.lml, 0.0)
                } else {
                    (null.lml + 0.5 * nom_x * nom_x / s, nom_x / s)
                }
            })
            .collect();

        let (lmls, effect_sizes) = scored.into_iter().unzip();
        debug!(
            "Scored {} candidate(s) against {} whitened covariate(s)",
            candidates.ncols(),
            null.etm.ncols()
        );
        Ok(ScanResult {
            null_lml: null.lml,
            lmls,
            effect_sizes,
        })
    }

    fn check_rows(&self, what: &'static str, m: &DenseMatrix) -> Result<()> {
        if m.nrows() != self.nsamples() {
            return Err(InferenceError::SampleCountMismatch {
                what,
                expected: self.nsamples(),
                got: m.nrows(),
            });
        }
        Ok(())
    }
}

/// Covariates-only fit shared by every candidate.
struct NullFit {
    /// `E tM`.
    etm: DenseMatrix,
    /// Cholesky factor of `tM' E tM`; absent without covariates.
    chol: Option<CholeskyDecomp>,
    /// `(tM' E tM)^{-1} tM' nom`.
    b0: Vec<f64>,
    lml: f64,
}

impl NullFit {
    fn new(fixed: &FixedEp, covariates: &DenseMatrix) -> Result<Self> {
        let whitening = Whitening::new(covariates)?;
        let tm = whitening.whitened();
        let k = tm.ncols();
        let mut etm = DenseMatrix::zeros(tm.nrows(), k);
        for j in 0..k {
            etm.set_col(j, &fixed.precision_apply(&tm.col(j)));
        }
        if k == 0 {
            return Ok(Self {
                etm,
                chol: None,
                b0: Vec::new(),
                lml: fixed.mean_free,
            });
        }
        let chol = CholeskyDecomp::new(&tm.t_mat_mul(&etm))
            .map_err(|_| InferenceError::DegenerateCovariates)?;
        let u0 = tm.t_mat_vec(&fixed.nom);
        let b0 = chol.solve(&u0);
        let lml = fixed.mean_free + 0.5 * dot(&u0, &b0);
        Ok(Self {
            etm,
            chol: Some(chol),
            b0,
            lml,
        })
    }
}
