//! Bernoulli, Binomial and Poisson likelihoods.

use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use statrs::function::gamma::ln_gamma;

use super::moments::LogLikDerivs;
use super::{LikelihoodFamily, LikelihoodKind};
use crate::config::InferenceConfig;
use crate::error::{InferenceError, Result};
use crate::util::math::{log1pexp, logistic, mean, population_std, standardize};

fn check_finite(values: &[f64]) -> Result<()> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::NonFinitePhenotype);
    }
    Ok(())
}

fn check_not_singleton(values: &[f64]) -> Result<()> {
    match values.first() {
        Some(&first) if values.iter().any(|&v| v != first) => Ok(()),
        _ => Err(InferenceError::SingletonPhenotype),
    }
}

/// Binomial log-likelihood with logit link, shared by Bernoulli.
fn binomial_log_likelihood(k: f64, n: f64, log_choose: f64, z: f64) -> LogLikDerivs {
    let p = logistic(z);
    LogLikDerivs {
        value: k * z - n * log1pexp(z) + log_choose,
        d1: k - n * p,
        d2: -n * p * (1.0 - p),
    }
}

fn log_choose(n: f64, k: f64) -> f64 {
    ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0)
}

/// Binary outcomes y_i in {0, 1} under a logit link.
///
/// The environmental variance is fixed to pi^2/3, the variance of the
/// standard logistic distribution, and delta is pinned at 0.
#[derive(Debug, Clone)]
pub struct Bernoulli {
    outcome: Vec<f64>,
}

impl Bernoulli {
    pub fn new(outcome: Vec<f64>) -> Result<Self> {
        check_finite(&outcome)?;
        if let Some(index) = outcome.iter().position(|&y| y != 0.0 && y != 1.0) {
            return Err(InferenceError::InvalidOutcome {
                index,
                reason: format!("expected 0 or 1, got {}", outcome[index]),
            });
        }
        check_not_singleton(&outcome)?;
        Ok(Self { outcome })
    }

    pub fn outcome(&self) -> &[f64] {
        &self.outcome
    }

    fn prevalence(&self) -> f64 {
        mean(&self.outcome)
    }
}

/// Liability-scale correction of an observed-scale heritability.
fn liability_correction(h2: f64, prevalence: f64, ascertainment: f64) -> f64 {
    let normal = match Normal::new(0.0, 1.0) {
        Ok(n) => n,
        Err(_) => return h2,
    };
    let t = normal.inverse_cdf(1.0 - prevalence);
    let z = normal.pdf(t);
    let k = prevalence * (1.0 - prevalence);
    let p = ascertainment * (1.0 - ascertainment);
    h2 * k * k / (z * z * p)
}

impl LikelihoodFamily for Bernoulli {
    fn kind(&self) -> LikelihoodKind {
        LikelihoodKind::Bernoulli
    }

    fn nsamples(&self) -> usize {
        self.outcome.len()
    }

    fn site_log_likelihood(&self, i: usize, z: f64) -> LogLikDerivs {
        binomial_log_likelihood(self.outcome[i], 1.0, 0.0, z)
    }

    fn environmental_variance(&self, _v: f64, _delta: f64) -> f64 {
        std::f64::consts::PI * std::f64::consts::PI / 3.0
    }

    fn has_overdispersion(&self) -> bool {
        false
    }

    fn latent_proxy(&self) -> Vec<f64> {
        let ratio = self.prevalence();
        let shift = Normal::new(0.0, 1.0)
            .map(|n| n.inverse_cdf(ratio))
            .unwrap_or(0.0);
        standardize(&self.outcome)
            .into_iter()
            .map(|v| v + shift)
            .collect()
    }

    fn initial_variances(&self, genetic: f64, noise: f64, config: &InferenceConfig) -> (f64, f64) {
        let ratio = self.prevalence();
        let h2 = liability_correction(genetic / (genetic + noise), ratio, ratio);
        let h2 = config.clip_heritability(h2);
        let v = self.environmental_variance(0.0, 0.0) * h2 / (1.0 - h2);
        (v, 0.0)
    }
}

/// Successes out of a known number of trials, logit link.
#[derive(Debug, Clone)]
pub struct Binomial {
    successes: Vec<f64>,
    trials: Vec<f64>,
    log_choose: Vec<f64>,
}

impl Binomial {
    pub fn new(successes: Vec<f64>, trials: Vec<f64>) -> Result<Self> {
        if successes.len() != trials.len() {
            return Err(InferenceError::SampleCountMismatch {
                what: "trials",
                expected: successes.len(),
                got: trials.len(),
            });
        }
        check_finite(&successes)?;
        check_finite(&trials)?;
        for (index, (&k, &n)) in successes.iter().zip(trials.iter()).enumerate() {
            if n <= 0.0 || k < 0.0 || k > n || k.fract() != 0.0 || n.fract() != 0.0 {
                return Err(InferenceError::InvalidOutcome {
                    index,
                    reason: format!("{k} successes out of {n} trials"),
                });
            }
        }
        check_not_singleton(&successes)?;
        let log_choose = successes
            .iter()
            .zip(trials.iter())
            .map(|(&k, &n)| log_choose(n, k))
            .collect();
        Ok(Self {
            successes,
            trials,
            log_choose,
        })
    }

    pub fn successes(&self) -> &[f64] {
        &self.successes
    }

    pub fn trials(&self) -> &[f64] {
        &self.trials
    }
}

impl LikelihoodFamily for Binomial {
    fn kind(&self) -> LikelihoodKind {
        LikelihoodKind::Binomial
    }

    fn nsamples(&self) -> usize {
        self.successes.len()
    }

    fn site_log_likelihood(&self, i: usize, z: f64) -> LogLikDerivs {
        binomial_log_likelihood(self.successes[i], self.trials[i], self.log_choose[i], z)
    }

    fn environmental_variance(&self, v: f64, delta: f64) -> f64 {
        v * delta
    }

    fn latent_proxy(&self) -> Vec<f64> {
        let ratio: Vec<f64> = self
            .successes
            .iter()
            .zip(self.trials.iter())
            .map(|(k, n)| k / n)
            .collect();
        standardize(&ratio)
    }
}

/// Event counts under a log link.
#[derive(Debug, Clone)]
pub struct Poisson {
    counts: Vec<f64>,
    log_factorial: Vec<f64>,
}

impl Poisson {
    pub fn new(counts: Vec<f64>) -> Result<Self> {
        check_finite(&counts)?;
        if let Some(index) = counts.iter().position(|&y| y < 0.0 || y.fract() != 0.0) {
            return Err(InferenceError::InvalidOutcome {
                index,
                reason: format!("expected a non-negative count, got {}", counts[index]),
            });
        }
        check_not_singleton(&counts)?;
        let log_factorial = counts.iter().map(|&y| ln_gamma(y + 1.0)).collect();
        Ok(Self {
            counts,
            log_factorial,
        })
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }
}

impl LikelihoodFamily for Poisson {
    fn kind(&self) -> LikelihoodKind {
        LikelihoodKind::Poisson
    }

    fn nsamples(&self) -> usize {
        self.counts.len()
    }

    fn site_log_likelihood(&self, i: usize, z: f64) -> LogLikDerivs {
        let y = self.counts[i];
        let rate = z.exp();
        LogLikDerivs {
            value: y * z - rate - self.log_factorial[i],
            d1: y - rate,
            d2: -rate,
        }
    }

    fn environmental_variance(&self, v: f64, delta: f64) -> f64 {
        v * delta
    }

    fn latent_proxy(&self) -> Vec<f64> {
        let m = mean(&self.counts);
        let sd = population_std(&self.counts);
        self.counts.iter().map(|y| (y - m) / sd).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::moments::Quadrature;

    const QUAD: Quadrature = Quadrature {
        points: 1001,
        width: 40.0,
    };

    #[test]
    fn test_binomial_with_one_trial_matches_bernoulli() {
        let bern = Bernoulli::new(vec![1.0, 0.0, 1.0]).unwrap();
        let binom = Binomial::new(vec![1.0, 0.0, 1.0], vec![1.0; 3]).unwrap();
        let tau = [0.8, 1.5, 2.0];
        let eta = [0.3, -0.2, 1.1];
        let a = bern.tilted_moments(&tau, &eta, QUAD);
        let b = binom.tilted_moments(&tau, &eta, QUAD);
        for i in 0..3 {
            assert!((a.log_z[i] - b.log_z[i]).abs() < 1e-12);
            assert!((a.mean[i] - b.mean[i]).abs() < 1e-12);
            assert!((a.variance[i] - b.variance[i]).abs() < 1e-12);
            assert!(a.variance[i] > 0.0);
        }
    }

    #[test]
    fn test_binomial_log_likelihood_derivatives() {
        let binom = Binomial::new(vec![3.0, 1.0], vec![7.0, 2.0]).unwrap();
        let h = 1e-5;
        for &z in &[-2.0, 0.1, 1.7] {
            let d = binom.site_log_likelihood(0, z);
            let up = binom.site_log_likelihood(0, z + h);
            let dn = binom.site_log_likelihood(0, z - h);
            assert!(((up.value - dn.value) / (2.0 * h) - d.d1).abs() < 1e-6);
            assert!(((up.d1 - dn.d1) / (2.0 * h) - d.d2).abs() < 1e-6);
        }
        // log C(7, 3) = log 35
        let at_zero = binom.site_log_likelihood(0, 0.0);
        assert!((at_zero.value - (35.0_f64.ln() - 7.0 * 2.0_f64.ln())).abs() < 1e-10);
    }

    #[test]
    fn test_poisson_moments_are_finite() {
        let pois = Poisson::new(vec![0.0, 3.0, 12.0]).unwrap();
        let m = pois.tilted_moments(&[0.5, 1.0, 4.0], &[-1.0, 0.2, 2.0], QUAD);
        for i in 0..3 {
            assert!(m.log_z[i].is_finite());
            assert!(m.mean[i].is_finite());
            assert!(m.variance[i] > 0.0);
        }
        // more counts pull the tilted mean above the cavity mean
        assert!(m.mean[2] > 0.5);
    }

    #[test]
    fn test_bernoulli_rejects_bad_outcomes() {
        assert!(matches!(
            Bernoulli::new(vec![0.0, 2.0]),
            Err(InferenceError::InvalidOutcome { index: 1, .. })
        ));
        assert!(matches!(
            Bernoulli::new(vec![1.0, 1.0, 1.0]),
            Err(InferenceError::SingletonPhenotype)
        ));
        assert!(matches!(
            Bernoulli::new(vec![0.0, f64::NAN]),
            Err(InferenceError::NonFinitePhenotype)
        ));
    }

    #[test]
    fn test_binomial_rejects_excess_successes() {
        assert!(matches!(
            Binomial::new(vec![3.0, 1.0], vec![2.0, 2.0]),
            Err(InferenceError::InvalidOutcome { index: 0, .. })
        ));
        assert!(matches!(
            Binomial::new(vec![1.0], vec![2.0, 2.0]),
            Err(InferenceError::SampleCountMismatch { .. })
        ));
    }

    #[test]
    fn test_poisson_rejects_negative_counts() {
        assert!(matches!(
            Poisson::new(vec![1.0, -1.0]),
            Err(InferenceError::InvalidOutcome { index: 1, .. })
        ));
    }

    #[test]
    fn test_environmental_variance_policy() {
        let bern = Bernoulli::new(vec![1.0, 0.0]).unwrap();
        let pois = Poisson::new(vec![1.0, 0.0]).unwrap();
        assert!((bern.environmental_variance(2.0, 0.5) - 3.289868133696453).abs() < 1e-12);
        assert!((pois.environmental_variance(2.0, 0.25) - 0.5).abs() < 1e-12);
        assert!(!bern.has_overdispersion());
        assert!(pois.has_overdispersion());
    }

    #[test]
    fn test_latent_proxies_are_standardized() {
        let binom = Binomial::new(vec![1.0, 4.0, 2.0], vec![5.0, 5.0, 4.0]).unwrap();
        let z = binom.latent_proxy();
        assert!(mean(&z).abs() < 1e-12);
        assert!((population_std(&z) - 1.0).abs() < 1e-12);

        let bern = Bernoulli::new(vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        let z = bern.latent_proxy();
        // centred proxy shifted by the probit of the prevalence
        assert!((mean(&z) - (-0.6744897501960817)).abs() < 1e-6);
    }

    #[test]
    fn test_bernoulli_initial_variances_pin_delta() {
        let config = InferenceConfig::default();
        let bern = Bernoulli::new(vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let (v, delta) = bern.initial_variances(0.5, 0.5, &config);
        assert_eq!(delta, 0.0);
        assert!(v > 0.0);

        let pois = Poisson::new(vec![1.0, 0.0]).unwrap();
        let (v, delta) = pois.initial_variances(0.2, 0.6, &config);
        assert!((v - 0.8).abs() < 1e-12);
        assert!((delta - 0.75).abs() < 1e-12);
    }
}
