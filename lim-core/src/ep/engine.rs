//! Expectation propagation over a low-rank kinship covariance.
//!
//! The latent field is `z ~ N(M beta, K)` with
//! `K = s2b Q0 S0 Q0' + s2e I`, `s2b = v (1 - delta)` and `s2e = v delta`.
//! Each observation's likelihood is replaced by a Gaussian site with
//! natural parameters `(tau, eta)`; sweeps refine all sites in parallel
//! against their cavity distributions until the site parameters stop
//! moving.

use tracing::{debug, warn};

use lim_linalg::DenseMatrix;

use super::cache::{Derived, DirtyTable, Input};
use super::factor::SiteFactor;
use super::init::Whitening;
use crate::config::InferenceConfig;
use crate::error::{InferenceError, Result};
use crate::likelihood::moments::{Quadrature, TiltedMoments};
use crate::likelihood::{Bernoulli, Binomial, LikelihoodFamily, LikelihoodKind, Poisson};
use crate::spectral::SpectralCovariance;
use crate::util::math::max_abs;

/// Per-sample Gaussian natural parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NaturalParams {
    pub tau: Vec<f64>,
    pub eta: Vec<f64>,
}

impl NaturalParams {
    pub fn zeros(n: usize) -> Self {
        Self {
            tau: vec![0.0; n],
            eta: vec![0.0; n],
        }
    }

    fn minus(&self, other: &NaturalParams) -> NaturalParams {
        NaturalParams {
            tau: self.tau.iter().zip(&other.tau).map(|(a, b)| a - b).collect(),
            eta: self.eta.iter().zip(&other.eta).map(|(a, b)| a - b).collect(),
        }
    }
}

/// EP engine for one likelihood family over a borrowed spectral
/// decomposition.
#[derive(Debug)]
pub struct EpEngine<'a> {
    pub(super) family: Box<dyn LikelihoodFamily>,
    pub(super) spectral: &'a SpectralCovariance,
    pub(super) config: InferenceConfig,
    pub(super) covariates: DenseMatrix,
    pub(super) whitening: Whitening,
    pub(super) v: f64,
    pub(super) delta: f64,
    pub(super) tbeta: Vec<f64>,
    diag_qsq: Vec<f64>,
    pub(super) sites: NaturalParams,
    pub(super) cavity: NaturalParams,
    pub(super) joint: NaturalParams,
    pub(super) moments: TiltedMoments,
    pub(super) factor: Option<SiteFactor>,
    mean: Vec<f64>,
    pub(super) evidence: Option<super::evidence::LmlComponents>,
    pub(super) dirty: DirtyTable,
    sites_initialized: bool,
    sweeps: usize,
}

impl<'a> EpEngine<'a> {
    /// Build an engine and seed `(v, delta, beta)` from a FastLMM fit of
    /// the family's latent proxy.
    pub fn new(
        family: Box<dyn LikelihoodFamily>,
        covariates: DenseMatrix,
        spectral: &'a SpectralCovariance,
        config: InferenceConfig,
    ) -> Result<Self> {
        let n = spectral.nsamples();
        if family.nsamples() != n {
            return Err(InferenceError::SampleCountMismatch {
                what: "outcome",
                expected: n,
                got: family.nsamples(),
            });
        }
        if covariates.nrows() != n {
            return Err(InferenceError::SampleCountMismatch {
                what: "covariates",
                expected: n,
                got: covariates.nrows(),
            });
        }
        if !covariates.is_finite() {
            return Err(InferenceError::DegenerateCovariates);
        }

        let whitening = Whitening::new(&covariates)?;
        let ncols = whitening.ncols();
        let mut engine = Self {
            family,
            spectral,
            config,
            covariates,
            whitening,
            v: 1.0,
            delta: 0.0,
            tbeta: vec![0.0; ncols],
            diag_qsq: spectral.diag_q0sq0(),
            sites: NaturalParams::zeros(n),
            cavity: NaturalParams::zeros(n),
            joint: NaturalParams::zeros(n),
            moments: TiltedMoments::default(),
            factor: None,
            mean: vec![0.0; n],
            evidence: None,
            dirty: DirtyTable::default(),
            sites_initialized: false,
            sweeps: 0,
        };
        engine.initialize()?;
        Ok(engine)
    }

    /// Binary outcomes with a logit link.
    pub fn bernoulli(
        outcome: Vec<f64>,
        covariates: DenseMatrix,
        spectral: &'a SpectralCovariance,
    ) -> Result<Self> {
        Self::new(
            Box::new(Bernoulli::new(outcome)?),
            covariates,
            spectral,
            InferenceConfig::default(),
        )
    }

    /// Successes out of trials with a logit link.
    pub fn binomial(
        successes: Vec<f64>,
        trials: Vec<f64>,
        covariates: DenseMatrix,
        spectral: &'a SpectralCovariance,
    ) -> Result<Self> {
        Self::new(
            Box::new(Binomial::new(successes, trials)?),
            covariates,
            spectral,
            InferenceConfig::default(),
        )
    }

    /// Counts with a log link.
    pub fn poisson(
        counts: Vec<f64>,
        covariates: DenseMatrix,
        spectral: &'a SpectralCovariance,
    ) -> Result<Self> {
        Self::new(
            Box::new(Poisson::new(counts)?),
            covariates,
            spectral,
            InferenceConfig::default(),
        )
    }

    pub fn nsamples(&self) -> usize {
        self.spectral.nsamples()
    }

    pub fn kind(&self) -> LikelihoodKind {
        self.family.kind()
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn covariates(&self) -> &DenseMatrix {
        &self.covariates
    }

    pub fn v(&self) -> f64 {
        self.v
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn sigma2_b(&self) -> f64 {
        self.v * (1.0 - self.delta)
    }

    pub fn sigma2_epsilon(&self) -> f64 {
        self.v * self.delta
    }

    pub fn genetic_variance(&self) -> f64 {
        self.sigma2_b()
    }

    pub fn environmental_variance(&self) -> f64 {
        self.family.environmental_variance(self.v, self.delta)
    }

    /// Covariate effect sizes on the scale of the raw covariates.
    pub fn beta(&self) -> Vec<f64> {
        self.whitening.to_beta(&self.tbeta)
    }

    /// Effect sizes on the whitened covariates.
    pub fn tbeta(&self) -> &[f64] {
        &self.tbeta
    }

    /// Sum over covariates of the variance of `M[:, j] beta_j`.
    pub fn covariates_variance(&self) -> f64 {
        let beta = self.beta();
        let n = self.nsamples() as f64;
        let mut total = 0.0;
        for (j, b) in beta.iter().enumerate() {
            let col: Vec<f64> = self.covariates.col(j).iter().map(|m| m * b).collect();
            let mu = col.iter().sum::<f64>() / n;
            total += col.iter().map(|c| (c - mu) * (c - mu)).sum::<f64>() / n;
        }
        total
    }

    pub fn heritability(&self) -> f64 {
        let gv = self.genetic_variance();
        gv / (gv + self.covariates_variance() + self.environmental_variance())
    }

    /// Site parameters of the current approximation.
    pub fn site_params(&mut self) -> Result<&NaturalParams> {
        self.update()?;
        Ok(&self.sites)
    }

    /// Joint posterior marginals of the current approximation.
    pub fn joint_params(&mut self) -> Result<&NaturalParams> {
        self.update()?;
        Ok(&self.joint)
    }

    /// Sweeps used by the most recent EP run.
    pub fn converged_sweeps(&self) -> usize {
        self.sweeps
    }

    pub fn set_v(&mut self, v: f64) -> Result<()> {
        if !(v >= 0.0) || !v.is_finite() {
            return Err(InferenceError::InvalidHyperparameter { name: "v", value: v });
        }
        if v != self.v {
            self.v = v;
            self.dirty.invalidate(Input::Variance);
        }
        Ok(())
    }

    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&delta) {
            return Err(InferenceError::InvalidHyperparameter {
                name: "delta",
                value: delta,
            });
        }
        if !self.family.has_overdispersion() && delta != 0.0 {
            return Err(InferenceError::InvalidHyperparameter {
                name: "delta",
                value: delta,
            });
        }
        if delta != self.delta {
            self.delta = delta;
            self.dirty.invalidate(Input::Delta);
        }
        Ok(())
    }

    /// Set effect sizes on the raw covariate scale.
    pub fn set_beta(&mut self, beta: &[f64]) -> Result<()> {
        if beta.len() != self.covariates.ncols() {
            return Err(InferenceError::SampleCountMismatch {
                what: "beta",
                expected: self.covariates.ncols(),
                got: beta.len(),
            });
        }
        if let Some(&bad) = beta.iter().find(|b| !b.is_finite()) {
            return Err(InferenceError::InvalidHyperparameter {
                name: "beta",
                value: bad,
            });
        }
        let tbeta = self.whitening.to_tbeta(beta);
        self.set_tbeta(tbeta);
        Ok(())
    }

    pub(super) fn set_tbeta(&mut self, tbeta: Vec<f64>) {
        if tbeta != self.tbeta {
            self.tbeta = tbeta;
            self.dirty.invalidate(Input::Beta);
        }
    }

    /// Forget the site approximation; the next evaluation starts from
    /// the prior again.
    pub(super) fn reset_sites(&mut self) {
        let n = self.nsamples();
        self.sites = NaturalParams::zeros(n);
        self.sites_initialized = false;
        self.factor = None;
        self.dirty.invalidate_all();
    }

    pub(super) fn q0(&self) -> &'a DenseMatrix {
        self.spectral.q0()
    }

    pub(super) fn mean(&mut self) -> &[f64] {
        if self.dirty.is_dirty(Derived::Mean) {
            self.mean = self.whitening.whitened().mat_vec(&self.tbeta);
            self.dirty.mark_clean(Derived::Mean);
        }
        &self.mean
    }

    pub(super) fn ensure_factor(&mut self) -> Result<()> {
        if self.dirty.is_dirty(Derived::Factor) || self.factor.is_none() {
            let factor = SiteFactor::new(
                self.spectral.q0(),
                self.spectral.s0(),
                &self.sites.tau,
                self.sigma2_b(),
                self.sigma2_epsilon(),
            )?;
            self.factor = Some(factor);
            self.dirty.mark_clean(Derived::Factor);
        }
        Ok(())
    }

    /// The factor computed by the last `ensure_factor`.
    pub(super) fn site_factor(&self) -> Result<&SiteFactor> {
        self.factor
            .as_ref()
            .ok_or_else(|| InferenceError::Optimization("site factor unavailable".to_string()))
    }

    /// `K x` through the eigenbasis.
    fn covariance_apply(&self, x: &[f64]) -> Vec<f64> {
        let q0 = self.spectral.q0();
        let mut z = q0.t_mat_vec(x);
        for (zk, s) in z.iter_mut().zip(self.spectral.s0()) {
            *zk *= s;
        }
        let s2b = self.sigma2_b();
        let s2e = self.sigma2_epsilon();
        q0.mat_vec(&z)
            .iter()
            .zip(x)
            .map(|(kz, xi)| s2b * kz + s2e * xi)
            .collect()
    }

    /// Recompute the joint marginals from the current sites.
    fn joint_update(&mut self) -> Result<()> {
        let m = self.mean().to_vec();
        let k_eta = self.covariance_apply(&self.sites.eta);
        let s2e = self.sigma2_epsilon();
        let q0 = self.q0();
        self.ensure_factor()?;
        let factor = self.site_factor()?;

        let am: Vec<f64> = factor.a.iter().zip(&m).map(|(a, x)| a * x).collect();
        let ak: Vec<f64> = factor.a.iter().zip(&k_eta).map(|(a, x)| a * x).collect();
        let qb_am = factor.qbiqt(q0, &am);
        let qb_ak = factor.qbiqt(q0, &ak);

        let n = m.len();
        let mut tau = Vec::with_capacity(n);
        let mut eta = Vec::with_capacity(n);
        for i in 0..n {
            let jt = 1.0 / (s2e + factor.c[i] * factor.q[i]);
            eta.push((m[i] - qb_am[i] + k_eta[i] - qb_ak[i]) * jt);
            tau.push(jt / factor.c[i]);
        }
        self.joint = NaturalParams { tau, eta };
        Ok(())
    }

    fn initialize_joint_from_prior(&mut self) {
        let s2b = self.sigma2_b();
        let s2e = self.sigma2_epsilon();
        let m = self.mean().to_vec();
        let tau: Vec<f64> = self.diag_qsq.iter().map(|d| 1.0 / (s2b * d + s2e)).collect();
        let eta = m.iter().zip(&tau).map(|(m, t)| m * t).collect();
        let n = tau.len();
        self.joint = NaturalParams { tau, eta };
        self.sites = NaturalParams::zeros(n);
        self.dirty.invalidate(Input::Sites);
        self.sites_initialized = true;
    }

    /// Run EP sweeps until the site parameters converge, if any input
    /// changed since the last run.
    pub(super) fn update(&mut self) -> Result<()> {
        if !self.dirty.is_dirty(Derived::Posterior) {
            return Ok(());
        }
        if self.sites_initialized {
            self.joint_update()?;
        } else {
            self.initialize_joint_from_prior();
        }

        let quad = Quadrature {
            points: self.config.quadrature_points,
            width: self.config.quadrature_width,
        };
        let threshold = 2.0 * self.config.ep_tol;
        let mut converged = false;
        let mut sweep = 0;
        while sweep < self.config.max_ep_iter {
            let prev = self.sites.clone();
            self.cavity = self.joint.minus(&self.sites);
            let moments = self
                .family
                .tilted_moments(&self.cavity.tau, &self.cavity.eta, quad);

            for i in 0..moments.len() {
                let (mean, variance) = (moments.mean[i], moments.variance[i]);
                if !(variance > 0.0) || !variance.is_finite() || !mean.is_finite() {
                    return Err(InferenceError::TiltedMoments {
                        index: i,
                        mean,
                        variance,
                    });
                }
            }

            let floor = self.config.site_tau_floor;
            for i in 0..moments.len() {
                let var = moments.variance[i];
                self.sites.tau[i] = (1.0 / var - self.cavity.tau[i]).max(floor);
                self.sites.eta[i] = moments.mean[i] / var - self.cavity.eta[i];
            }
            self.moments = moments;
            self.dirty.invalidate(Input::Sites);
            self.joint_update()?;

            let tau_diff: Vec<f64> = self.sites.tau.iter().zip(&prev.tau).map(|(a, b)| a - b).collect();
            let eta_diff: Vec<f64> = self.sites.eta.iter().zip(&prev.eta).map(|(a, b)| a - b).collect();
            let aerr = max_abs(&tau_diff) + max_abs(&eta_diff);
            let rerr = relative_change(&tau_diff, &eta_diff, &prev);

            sweep += 1;
            if aerr < threshold || rerr < threshold {
                converged = true;
                break;
            }
        }
        self.sweeps = sweep;
        debug!("EP finished after {} sweep(s)", sweep);
        if !converged {
            warn!(
                "EP did not converge within {} sweeps (v={:.4e}, delta={:.4e})",
                self.config.max_ep_iter, self.v, self.delta
            );
        }
        self.dirty.mark_clean(Derived::Posterior);
        Ok(())
    }
}

/// Sum of the largest relative changes in tau and eta; infinite when any
/// previous value makes the ratio undefined.
fn relative_change(tau_diff: &[f64], eta_diff: &[f64], prev: &NaturalParams) -> f64 {
    let tau_min = prev.tau.iter().copied().fold(f64::INFINITY, f64::min);
    if tau_min <= 0.0 || prev.eta.iter().any(|&e| e == 0.0) {
        return f64::INFINITY;
    }
    let rt = tau_diff
        .iter()
        .zip(&prev.tau)
        .fold(0.0_f64, |m, (d, p)| m.max(d.abs() / p.abs()));
    let re = eta_diff
        .iter()
        .zip(&prev.eta)
        .fold(0.0_f64, |m, (d, p)| m.max(d.abs() / p.abs()));
    rt + re
}
