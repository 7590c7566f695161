//! Moments of the tilted distribution of one EP site.
//!
//! The tilted density is `exp(l(z)) N(z | eta/tau, 1/tau)`. Its mode is
//! located by a damped Newton search (the log-likelihoods used here are
//! concave, so the mode is unique); the normalizer, mean and variance
//! then come from trapezoid quadrature over a window of
//! `width` Laplace standard deviations on each side of the mode.

/// Value, first and second derivative of a per-site log-likelihood.
#[derive(Debug, Clone, Copy)]
pub struct LogLikDerivs {
    pub value: f64,
    pub d1: f64,
    pub d2: f64,
}

/// Moments of one tilted distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteMoments {
    pub log_z: f64,
    pub mean: f64,
    pub variance: f64,
}

impl SiteMoments {
    fn undefined() -> Self {
        Self {
            log_z: f64::NAN,
            mean: f64::NAN,
            variance: f64::NAN,
        }
    }
}

/// Moments for every site, in sample order.
#[derive(Debug, Clone, Default)]
pub struct TiltedMoments {
    pub log_z: Vec<f64>,
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

impl TiltedMoments {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            log_z: Vec::with_capacity(n),
            mean: Vec::with_capacity(n),
            variance: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, m: SiteMoments) {
        self.log_z.push(m.log_z);
        self.mean.push(m.mean);
        self.variance.push(m.variance);
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }
}

const MAX_NEWTON_STEPS: usize = 200;
const MAX_NEWTON_STEP: f64 = 5.0;

/// Quadrature settings for [`tilted_site`].
#[derive(Debug, Clone, Copy)]
pub struct Quadrature {
    pub points: usize,
    pub width: f64,
}

/// Tilted moments of a single site with cavity natural parameters
/// `(tau, eta)`. A non-positive or non-finite cavity precision yields
/// NaN moments.
pub fn tilted_site<F>(loglik: F, tau: f64, eta: f64, quad: Quadrature) -> SiteMoments
where
    F: Fn(f64) -> LogLikDerivs,
{
    if !(tau > 0.0) || !tau.is_finite() || !eta.is_finite() {
        return SiteMoments::undefined();
    }
    let mu = eta / tau;
    let log_norm = -0.5 * (2.0 * std::f64::consts::PI / tau).ln();
    let g = |z: f64| loglik(z).value - 0.5 * tau * (z - mu) * (z - mu) + log_norm;

    let mut z = mu;
    for _ in 0..MAX_NEWTON_STEPS {
        let d = loglik(z);
        let g1 = d.d1 - tau * (z - mu);
        let g2 = d.d2 - tau;
        let step = (-g1 / g2).clamp(-MAX_NEWTON_STEP, MAX_NEWTON_STEP);
        if !step.is_finite() {
            return SiteMoments::undefined();
        }
        z += step;
        if step.abs() <= 1e-12 * z.abs().max(1.0) {
            break;
        }
    }

    let curvature = tau - loglik(z).d2;
    let sd = 1.0 / curvature.sqrt();
    let npts = quad.points.max(3);
    let lo = -quad.width * sd;
    let h = 2.0 * quad.width * sd / (npts - 1) as f64;
    let g_mode = g(z);

    let (mut s0, mut s1, mut s2) = (0.0, 0.0, 0.0);
    for i in 0..npts {
        let x = lo + i as f64 * h;
        let w = (g(z + x) - g_mode).exp();
        s0 += w;
        s1 += w * x;
        s2 += w * x * x;
    }
    let shift = s1 / s0;
    SiteMoments {
        log_z: g_mode + (s0 * h).ln(),
        mean: z + shift,
        variance: s2 / s0 - shift * shift,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: Quadrature = Quadrature {
        points: 1001,
        width: 40.0,
    };

    #[test]
    fn test_gaussian_likelihood_is_exact() {
        // l(z) = log N(y | z, s2): tilted moments are a conjugate update
        let (y, s2) = (1.3_f64, 0.5_f64);
        let loglik = |z: f64| LogLikDerivs {
            value: -0.5 * (2.0 * std::f64::consts::PI * s2).ln() - 0.5 * (y - z) * (y - z) / s2,
            d1: (y - z) / s2,
            d2: -1.0 / s2,
        };
        let (tau, eta) = (2.0, 0.4);
        let m = tilted_site(loglik, tau, eta, QUAD);
        let post_tau = tau + 1.0 / s2;
        let post_mean = (eta + y / s2) / post_tau;
        assert!((m.mean - post_mean).abs() < 1e-10);
        assert!((m.variance - 1.0 / post_tau).abs() < 1e-10);
        // evidence: N(y | mu, 1/tau + s2)
        let mu = eta / tau;
        let var = 1.0 / tau + s2;
        let log_z = -0.5 * (2.0 * std::f64::consts::PI * var).ln() - 0.5 * (y - mu) * (y - mu) / var;
        assert!((m.log_z - log_z).abs() < 1e-10);
    }

    #[test]
    fn test_non_positive_precision_is_undefined() {
        let flat = |_z: f64| LogLikDerivs {
            value: 0.0,
            d1: 0.0,
            d2: 0.0,
        };
        assert!(tilted_site(flat, 0.0, 1.0, QUAD).variance.is_nan());
        assert!(tilted_site(flat, -1.0, 1.0, QUAD).mean.is_nan());
    }

    #[test]
    fn test_flat_likelihood_returns_cavity() {
        let flat = |_z: f64| LogLikDerivs {
            value: 0.0,
            d1: 0.0,
            d2: 0.0,
        };
        let m = tilted_site(flat, 4.0, 2.0, QUAD);
        assert!((m.mean - 0.5).abs() < 1e-12);
        assert!((m.variance - 0.25).abs() < 1e-12);
        assert!(m.log_z.abs() < 1e-10);
    }
}
