//! Closed-form Gaussian mixed model in the eigenbasis of the kinship.
//!
//! Model: `y ~ N(M beta, scale * ((1 - delta) Q0 S0 Q0' + delta I))`.
//!
//! The outcome and covariates are projected onto Q0 and Q1 once at
//! construction. For a fixed delta both blocks are diagonal, so beta and
//! scale have a closed-form generalized least-squares solution and the
//! profile log-likelihood costs O(n p^2). `learn` maximizes it over delta.

use argmin::core::{CostFunction, Error as ArgminError, Executor, State};
use argmin::solver::brent::BrentOpt;
use tracing::debug;

use lim_linalg::{CholeskyDecomp, DenseMatrix};

use crate::config::InferenceConfig;
use crate::error::{InferenceError, Result};
use crate::spectral::SpectralCovariance;
use crate::util::math::{logistic, logit, population_variance};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Generalized least-squares solution for a fixed delta.
#[derive(Debug, Clone)]
struct GlsFit {
    delta: f64,
    beta: Vec<f64>,
    scale: f64,
    lml: f64,
}

/// FastLMM evaluator over a borrowed spectral decomposition.
#[derive(Debug, Clone)]
pub struct FastLmm<'a> {
    spectral: &'a SpectralCovariance,
    config: InferenceConfig,
    y: Vec<f64>,
    covariates: DenseMatrix,
    yq0: Vec<f64>,
    yq1: Vec<f64>,
    mq0: DenseMatrix,
    mq1: DenseMatrix,
    delta: f64,
    fit: Option<GlsFit>,
}

impl<'a> FastLmm<'a> {
    /// Project `y` and `covariates` onto the eigenbasis.
    pub fn new(
        y: &[f64],
        covariates: &DenseMatrix,
        spectral: &'a SpectralCovariance,
        config: InferenceConfig,
    ) -> Result<Self> {
        let n = spectral.nsamples();
        if y.len() != n {
            return Err(InferenceError::SampleCountMismatch {
                what: "outcome",
                expected: n,
                got: y.len(),
            });
        }
        if covariates.nrows() != n {
            return Err(InferenceError::SampleCountMismatch {
                what: "covariates",
                expected: n,
                got: covariates.nrows(),
            });
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(InferenceError::NonFinitePhenotype);
        }
        let variance = population_variance(y);
        if variance < config.variance_floor {
            return Err(InferenceError::PhenotypeVarianceTooLow {
                variance,
                floor: config.variance_floor,
            });
        }

        let q0 = spectral.q0();
        let q1 = spectral.q1();
        Ok(Self {
            spectral,
            yq0: q0.t_mat_vec(y),
            yq1: q1.t_mat_vec(y),
            mq0: q0.t_mat_mul(covariates),
            mq1: q1.t_mat_mul(covariates),
            y: y.to_vec(),
            covariates: covariates.clone(),
            delta: 0.5,
            fit: None,
            config,
        })
    }

    pub fn nsamples(&self) -> usize {
        self.y.len()
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Set delta, invalidating the cached fit.
    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&delta) {
            return Err(InferenceError::InvalidHyperparameter {
                name: "delta",
                value: delta,
            });
        }
        if delta != self.delta {
            self.delta = delta;
            self.fit = None;
        }
        Ok(())
    }

    fn gls(&self, delta: f64) -> Result<GlsFit> {
        let n = self.nsamples();
        let p = self.covariates.ncols();
        let r = self.spectral.rank();
        let s0 = self.spectral.s0();

        let d0: Vec<f64> = s0.iter().map(|s| (1.0 - delta) * s + delta).collect();
        let d1 = delta;

        let mut a = 0.0;
        let mut b = vec![0.0; p];
        let mut c = DenseMatrix::zeros(p, p);
        for (k, &d) in d0.iter().enumerate() {
            let yk = self.yq0[k];
            a += yk * yk / d;
            for j in 0..p {
                let mj = self.mq0.get(k, j) / d;
                b[j] += mj * yk;
                for l in j..p {
                    let v = c.get(j, l) + mj * self.mq0.get(k, l);
                    c.set(j, l, v);
                }
            }
        }
        if n > r {
            for k in 0..(n - r) {
                let yk = self.yq1[k];
                a += yk * yk / d1;
                for j in 0..p {
                    let mj = self.mq1.get(k, j) / d1;
                    b[j] += mj * yk;
                    for l in j..p {
                        let v = c.get(j, l) + mj * self.mq1.get(k, l);
                        c.set(j, l, v);
                    }
                }
            }
        }
        for j in 0..p {
            for l in 0..j {
                c.set(j, l, c.get(l, j));
            }
        }

        let beta = if p == 0 {
            Vec::new()
        } else {
            let chol = CholeskyDecomp::new(&c).map_err(|_| InferenceError::DegenerateCovariates)?;
            let max_diag = c.diag().iter().copied().fold(0.0_f64, f64::max);
            let min_pivot = chol.l.diag().iter().map(|l| l * l).fold(f64::INFINITY, f64::min);
            if min_pivot < self.config.degenerate_tol * max_diag {
                return Err(InferenceError::DegenerateCovariates);
            }
            chol.solve(&b)
        };

        let explained: f64 = b.iter().zip(beta.iter()).map(|(x, y)| x * y).sum();
        let scale = (a - explained) / n as f64;
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(InferenceError::DegenerateCovariates);
        }

        let nf = n as f64;
        let mut log_det: f64 = d0.iter().map(|d| d.ln()).sum();
        if n > r {
            log_det += (n - r) as f64 * d1.ln();
        }
        let lml = -0.5 * (nf * LN_2PI + nf + nf * scale.ln() + log_det);

        Ok(GlsFit {
            delta,
            beta,
            scale,
            lml,
        })
    }

    fn ensure_fit(&mut self) -> Result<&GlsFit> {
        let stale = self.fit.as_ref().map_or(true, |f| f.delta != self.delta);
        if stale {
            self.fit = Some(self.gls(self.delta)?);
        }
        self.fit.as_ref().ok_or(InferenceError::DegenerateCovariates)
    }

    /// Profile log marginal likelihood at the current delta.
    pub fn lml(&mut self) -> Result<f64> {
        Ok(self.ensure_fit()?.lml)
    }

    /// GLS effect sizes at the current delta.
    pub fn beta(&mut self) -> Result<Vec<f64>> {
        Ok(self.ensure_fit()?.beta.clone())
    }

    /// Residual scale at the current delta.
    pub fn scale(&mut self) -> Result<f64> {
        Ok(self.ensure_fit()?.scale)
    }

    /// Fitted mean `M beta`.
    pub fn mean(&mut self) -> Result<Vec<f64>> {
        let beta = self.beta()?;
        Ok(self.covariates.mat_vec(&beta))
    }

    pub fn genetic_variance(&mut self) -> Result<f64> {
        let delta = self.delta;
        Ok(self.scale()? * (1.0 - delta))
    }

    pub fn environmental_variance(&mut self) -> Result<f64> {
        let delta = self.delta;
        Ok(self.scale()? * delta)
    }

    /// Variance of the fixed-effect mean across samples.
    pub fn fixed_effects_variance(&mut self) -> Result<f64> {
        Ok(population_variance(&self.mean()?))
    }

    pub fn heritability(&mut self) -> Result<f64> {
        let gv = self.genetic_variance()?;
        let ev = self.environmental_variance()?;
        let fev = self.fixed_effects_variance()?;
        Ok(gv / (fev + gv + ev))
    }

    /// Maximize the profile likelihood over delta.
    pub fn learn(&mut self) -> Result<()> {
        let (lo, hi) = self.config.delta_bounds;
        let max_iters = self.config.max_optimizer_iter;
        let solver = BrentOpt::new(logit(lo), logit(hi)).set_tolerance(1e-8, 1e-8);
        let best = {
            let problem = DeltaObjective { lmm: self };
            let result = Executor::new(problem, solver)
                .configure(|state| state.max_iters(max_iters))
                .run()
                .map_err(into_inference_error)?;
            result.state().get_best_param().copied()
        };
        let x = best.ok_or_else(|| InferenceError::Optimization("no delta candidate".to_string()))?;

        let delta = self.config.clip_delta(logistic(x));
        self.set_delta(delta)?;
        let lml = self.lml()?;
        debug!("FastLMM learned delta={:.6} (lml={:.6})", delta, lml);
        Ok(())
    }

    /// K^{-1} x with `K = gv Q0 S0 Q0' + ev I`.
    fn solve_covariance(&self, x: &[f64], gv: f64, ev: f64) -> Vec<f64> {
        let q0 = self.spectral.q0();
        let q1 = self.spectral.q1();
        let mut z0 = q0.t_mat_vec(x);
        for (z, s) in z0.iter_mut().zip(self.spectral.s0()) {
            *z /= gv * s + ev;
        }
        let mut out = q0.mat_vec(&z0);
        if q1.ncols() > 0 {
            let z1: Vec<f64> = q1.t_mat_vec(x).iter().map(|v| v / ev).collect();
            for (o, v) in out.iter_mut().zip(q1.mat_vec(&z1)) {
                *o += v;
            }
        }
        out
    }

    /// Posterior predictive distribution at new points.
    ///
    /// `mp` holds the covariates of the new points, `cp` their
    /// cross-kinship with the training samples and `cpp` their own
    /// kinship.
    pub fn predict(
        &mut self,
        mp: &DenseMatrix,
        cp: &DenseMatrix,
        cpp: &DenseMatrix,
    ) -> Result<GaussianPrediction> {
        let n = self.nsamples();
        let m = mp.nrows();
        if cp.ncols() != n {
            return Err(InferenceError::SampleCountMismatch {
                what: "cross-covariance columns",
                expected: n,
                got: cp.ncols(),
            });
        }
        if cp.nrows() != m || cpp.nrows() != m || cpp.ncols() != m {
            return Err(InferenceError::SampleCountMismatch {
                what: "prediction points",
                expected: m,
                got: cp.nrows(),
            });
        }
        if mp.ncols() != self.covariates.ncols() {
            return Err(InferenceError::SampleCountMismatch {
                what: "prediction covariates",
                expected: self.covariates.ncols(),
                got: mp.ncols(),
            });
        }

        let beta = self.beta()?;
        let gv = self.genetic_variance()?;
        let ev = self.environmental_variance()?;
        let fitted = self.covariates.mat_vec(&beta);
        let resid: Vec<f64> = self.y.iter().zip(fitted.iter()).map(|(y, f)| y - f).collect();

        let kinv_resid = self.solve_covariance(&resid, gv, ev);
        let mean: Vec<f64> = mp
            .mat_vec(&beta)
            .iter()
            .zip(cp.mat_vec(&kinv_resid))
            .map(|(a, b)| a + gv * b)
            .collect();

        let mut kinv_cpt = DenseMatrix::zeros(n, m);
        for j in 0..m {
            let col = self.solve_covariance(&cp.row(j), gv, ev);
            kinv_cpt.set_col(j, &col);
        }
        let mut covariance = cpp
            .scale(gv)
            .add(&cp.mat_mul(&kinv_cpt).scale(-gv * gv));
        covariance.add_to_diag(ev);

        Ok(GaussianPrediction { mean, covariance })
    }

    /// Fitted-model summary at the current delta.
    pub fn summary(&mut self) -> Result<NormalModelSummary> {
        let gv = self.genetic_variance()?;
        let ev = self.environmental_variance()?;
        Ok(NormalModelSummary {
            beta: self.beta()?,
            fixed_effects_variance: self.fixed_effects_variance()?,
            heritability: self.heritability()?,
            genetic_variance: gv,
            environmental_variance: ev,
            total_variance: gv + ev,
            lml: self.lml()?,
        })
    }
}

pub(crate) fn into_inference_error(e: ArgminError) -> InferenceError {
    match e.downcast::<InferenceError>() {
        Ok(inner) => inner,
        Err(other) => InferenceError::Optimization(other.to_string()),
    }
}

struct DeltaObjective<'s, 'a> {
    lmm: &'s FastLmm<'a>,
}

impl CostFunction for DeltaObjective<'_, '_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, x: &f64) -> std::result::Result<f64, ArgminError> {
        let delta = self.lmm.config.clip_delta(logistic(*x));
        Ok(-self.lmm.gls(delta)?.lml)
    }
}

/// Multivariate normal predictive distribution.
#[derive(Debug, Clone)]
pub struct GaussianPrediction {
    pub mean: Vec<f64>,
    pub covariance: DenseMatrix,
}

impl GaussianPrediction {
    /// Log-density at `y`.
    pub fn logpdf(&self, y: &[f64]) -> Result<f64> {
        let k = self.mean.len();
        if y.len() != k {
            return Err(InferenceError::SampleCountMismatch {
                what: "prediction outcome",
                expected: k,
                got: y.len(),
            });
        }
        let chol = CholeskyDecomp::new(&self.covariance)?;
        let diff: Vec<f64> = y.iter().zip(self.mean.iter()).map(|(a, b)| a - b).collect();
        let z = chol.forward_solve(&diff);
        let quad: f64 = z.iter().map(|v| v * v).sum();
        Ok(-0.5 * (k as f64 * LN_2PI + quad) - chol.half_log_det())
    }

    /// Density at `y`.
    pub fn pdf(&self, y: &[f64]) -> Result<f64> {
        Ok(self.logpdf(y)?.exp())
    }
}

/// Variance decomposition of a fitted Gaussian model.
#[derive(Debug, Clone)]
pub struct NormalModelSummary {
    pub beta: Vec<f64>,
    pub fixed_effects_variance: f64,
    pub heritability: f64,
    pub genetic_variance: f64,
    pub environmental_variance: f64,
    pub total_variance: f64,
    pub lml: f64,
}

impl std::fmt::Display for NormalModelSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Phenotype:")?;
        writeln!(f, "  y_0 ~ Normal(m_0, sigma2_b K + sigma2_e I)")?;
        let beta: Vec<String> = self.beta.iter().map(|b| format!("{b:.4}")).collect();
        writeln!(f, "  Covariate effect sizes: [{}]", beta.join(", "))?;
        writeln!(f, "  Fixed-effects variance: {:.4}", self.fixed_effects_variance)?;
        writeln!(f, "  Heritability: {:.4}", self.heritability)?;
        writeln!(f, "  Genetic variance: {:.4}", self.genetic_variance)?;
        writeln!(f, "  Environmental variance: {:.4}", self.environmental_variance)?;
        writeln!(f, "  Total variance: {:.4}", self.total_variance)?;
        write!(f, "  Log marginal likelihood: {:.4}", self.lml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lim_linalg::decomposition::inverse_spd;

    fn toy() -> (SpectralCovariance, Vec<f64>, DenseMatrix) {
        let g = DenseMatrix::from_row_major(
            4,
            2,
            &[1.0, 0.2, -0.3, 0.8, 0.5, -1.1, 0.0, 0.4],
        );
        let k = g.mat_mul(&g.transpose());
        let sc = SpectralCovariance::from_kinship(&k, &InferenceConfig::default()).unwrap();
        let y = vec![0.3, -1.2, 2.1, 0.4];
        let m = DenseMatrix::from_row_major(4, 2, &[1.0, 0.5, 1.0, -0.2, 1.0, 1.3, 1.0, 0.1]);
        (sc, y, m)
    }

    fn brute_force_lml(sc: &SpectralCovariance, y: &[f64], m: &DenseMatrix, delta: f64) -> f64 {
        let n = y.len();
        let mut k = sc.kinship().scale(1.0 - delta);
        k.add_to_diag(delta);
        let kinv = inverse_spd(&k).unwrap();
        let mtkm = m.transpose().mat_mul(&kinv).mat_mul(m);
        let mtky = m.transpose().mat_mul(&kinv).mat_vec(y);
        let beta = lim_linalg::decomposition::solve_spd(&mtkm, &mtky).unwrap();
        let fitted = m.mat_vec(&beta);
        let r: Vec<f64> = y.iter().zip(fitted.iter()).map(|(a, b)| a - b).collect();
        let rss = DenseMatrix::dot(&r, &kinv.mat_vec(&r));
        let scale = rss / n as f64;
        let chol = CholeskyDecomp::new(&k.scale(scale)).unwrap();
        -0.5 * (n as f64 * LN_2PI + rss / scale) - chol.half_log_det()
    }

    #[test]
    fn test_lml_matches_dense_gaussian() {
        let (sc, y, m) = toy();
        assert_eq!(sc.rank(), 2);
        let mut lmm = FastLmm::new(&y, &m, &sc, InferenceConfig::default()).unwrap();
        for &delta in &[0.1, 0.5, 0.9] {
            lmm.set_delta(delta).unwrap();
            let fast = lmm.lml().unwrap();
            let slow = brute_force_lml(&sc, &y, &m, delta);
            assert!((fast - slow).abs() < 1e-8, "delta={delta}: {fast} vs {slow}");
        }
    }

    #[test]
    fn test_learn_improves_lml() {
        let (sc, y, m) = toy();
        let mut lmm = FastLmm::new(&y, &m, &sc, InferenceConfig::default()).unwrap();
        lmm.set_delta(0.5).unwrap();
        let before = lmm.lml().unwrap();
        lmm.learn().unwrap();
        let after = lmm.lml().unwrap();
        assert!(after >= before - 1e-10);
        let d = lmm.delta();
        assert!((1e-5..=1.0 - 1e-5).contains(&d));
    }

    #[test]
    fn test_rejects_constant_outcome() {
        let (sc, _, m) = toy();
        let err = FastLmm::new(&[1.0; 4], &m, &sc, InferenceConfig::default()).unwrap_err();
        assert!(matches!(err, InferenceError::PhenotypeVarianceTooLow { .. }));
    }

    #[test]
    fn test_rejects_duplicate_covariates() {
        let (sc, y, _) = toy();
        let m = DenseMatrix::from_row_major(4, 2, &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let mut lmm = FastLmm::new(&y, &m, &sc, InferenceConfig::default()).unwrap();
        assert!(matches!(lmm.lml(), Err(InferenceError::DegenerateCovariates)));
    }

    #[test]
    fn test_predict_at_training_points() {
        let (sc, y, m) = toy();
        let mut lmm = FastLmm::new(&y, &m, &sc, InferenceConfig::default()).unwrap();
        lmm.set_delta(0.3).unwrap();
        let k = sc.kinship();
        let pred = lmm.predict(&m, &k, &k).unwrap();
        // Dense reference: mean = M b + gv K Kall^{-1} r
        let beta = lmm.beta().unwrap();
        let gv = lmm.genetic_variance().unwrap();
        let ev = lmm.environmental_variance().unwrap();
        let mut kall = k.scale(gv);
        kall.add_to_diag(ev);
        let kinv = inverse_spd(&kall).unwrap();
        let fitted = m.mat_vec(&beta);
        let r: Vec<f64> = y.iter().zip(fitted.iter()).map(|(a, b)| a - b).collect();
        let adj = k.mat_mul(&kinv).mat_vec(&r);
        for i in 0..4 {
            assert!((pred.mean[i] - (fitted[i] + gv * adj[i])).abs() < 1e-8);
        }
        let cov_ref = k.mat_mul(&kinv).mat_mul(&k);
        for i in 0..4 {
            for j in 0..4 {
                let expected =
                    gv * k.get(i, j) + if i == j { ev } else { 0.0 } - gv * gv * cov_ref.get(i, j);
                assert!((pred.covariance.get(i, j) - expected).abs() < 1e-8);
            }
        }
        assert!(pred.logpdf(&y).unwrap().is_finite());
        assert!(pred.pdf(&y).unwrap() > 0.0);
    }

    #[test]
    fn test_summary_display() {
        let (sc, y, m) = toy();
        let mut lmm = FastLmm::new(&y, &m, &sc, InferenceConfig::default()).unwrap();
        lmm.learn().unwrap();
        let summary = lmm.summary().unwrap();
        assert!((summary.total_variance - lmm.scale().unwrap()).abs() < 1e-12);
        let text = summary.to_string();
        assert!(text.contains("Heritability"));
    }
}
