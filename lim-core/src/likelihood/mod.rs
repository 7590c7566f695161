//! Observation models for EP inference.
//!
//! Each family owns its observed data and exposes the per-site
//! log-likelihood, from which the tilted moments are computed, plus the
//! policy for the environmental variance that enters heritability.

pub mod family;
pub mod moments;

use serde::{Deserialize, Serialize};

use crate::config::InferenceConfig;
use moments::{tilted_site, LogLikDerivs, Quadrature, TiltedMoments};

pub use family::{Bernoulli, Binomial, Poisson};

/// Likelihood tag stored in fitted models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikelihoodKind {
    Normal,
    Bernoulli,
    Binomial,
    Poisson,
}

impl std::fmt::Display for LikelihoodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LikelihoodKind::Normal => "normal",
            LikelihoodKind::Bernoulli => "bernoulli",
            LikelihoodKind::Binomial => "binomial",
            LikelihoodKind::Poisson => "poisson",
        };
        f.write_str(s)
    }
}

/// A non-Gaussian observation model over n samples.
pub trait LikelihoodFamily: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> LikelihoodKind;

    /// Number of observations.
    fn nsamples(&self) -> usize;

    /// log p(y_i | z) and its first two derivatives in z.
    fn site_log_likelihood(&self, i: usize, z: f64) -> LogLikDerivs;

    /// Variance of the non-structured component given `(v, delta)`.
    fn environmental_variance(&self, v: f64, delta: f64) -> f64;

    /// Whether delta is a free parameter. When false, delta stays at 0.
    fn has_overdispersion(&self) -> bool {
        true
    }

    /// Pseudo-continuous transform of the outcome, fed to FastLMM to
    /// seed the hyperparameters.
    fn latent_proxy(&self) -> Vec<f64>;

    /// Starting `(v, delta)` from the FastLMM variance split of the proxy.
    fn initial_variances(&self, genetic: f64, noise: f64, config: &InferenceConfig) -> (f64, f64) {
        let h2 = config.clip_heritability(genetic / (genetic + noise));
        (genetic + noise, 1.0 - h2)
    }

    /// Tilted moments for every site given the cavity parameters.
    fn tilted_moments(&self, cavity_tau: &[f64], cavity_eta: &[f64], quad: Quadrature) -> TiltedMoments {
        let n = self.nsamples();
        let mut out = TiltedMoments::with_capacity(n);
        for i in 0..n {
            out.push(tilted_site(
                |z| self.site_log_likelihood(i, z),
                cavity_tau[i],
                cavity_eta[i],
                quad,
            ));
        }
        out
    }
}
