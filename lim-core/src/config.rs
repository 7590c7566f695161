//! Numerical constants for FastLMM and EP inference.

/// Configuration shared by the FastLMM core, the EP engine and the
/// fixed-snapshot scan.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Maximum EP sweeps per site update.
    pub max_ep_iter: usize,
    /// EP tolerance; a sweep converges when the absolute or relative
    /// site change drops below twice this value.
    pub ep_tol: f64,
    /// Lower bound for site precisions.
    pub site_tau_floor: f64,
    /// Allowed range for delta during optimization.
    pub delta_bounds: (f64, f64),
    /// Clip range for the initial heritability estimate.
    pub heritability_bounds: (f64, f64),
    /// Maximum fixed-point refinements of beta.
    pub beta_max_iter: usize,
    /// Stop refining beta once the squared change falls below this.
    pub beta_tol: f64,
    /// Minimum sample variance of a Gaussian outcome.
    pub variance_floor: f64,
    /// Largest accepted ratio between extreme eigenvalues of S0.
    pub max_condition: f64,
    /// Allowed range for the total variance v.
    pub variance_bounds: (f64, f64),
    /// Iteration cap for each numerical optimizer run.
    pub max_optimizer_iter: u64,
    /// Relative tolerance for scalar Brent searches.
    pub brent_tol: f64,
    /// Relative threshold below which a candidate's Schur complement
    /// counts as zero.
    pub degenerate_tol: f64,
    /// Number of quadrature nodes for tilted moments.
    pub quadrature_points: usize,
    /// Half-width of the quadrature window, in Laplace standard deviations.
    pub quadrature_width: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_ep_iter: 10,
            ep_tol: 1e-5,
            site_tau_floor: 1e-16,
            delta_bounds: (1e-5, 1.0 - 1e-5),
            heritability_bounds: (0.01, 0.9),
            beta_max_iter: 5,
            beta_tol: 1e-7,
            variance_floor: 1e-8,
            max_condition: 1e6,
            variance_bounds: (1e-4, 1e4),
            max_optimizer_iter: 200,
            brent_tol: 1e-6,
            degenerate_tol: f64::EPSILON.sqrt(),
            quadrature_points: 1001,
            quadrature_width: 40.0,
        }
    }
}

impl InferenceConfig {
    /// Clip delta into `delta_bounds`.
    pub fn clip_delta(&self, delta: f64) -> f64 {
        delta.clamp(self.delta_bounds.0, self.delta_bounds.1)
    }

    /// Clip v into `variance_bounds`.
    pub fn clip_variance(&self, v: f64) -> f64 {
        v.clamp(self.variance_bounds.0, self.variance_bounds.1)
    }

    /// Clip a heritability estimate into `heritability_bounds`.
    pub fn clip_heritability(&self, h2: f64) -> f64 {
        h2.clamp(self.heritability_bounds.0, self.heritability_bounds.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = InferenceConfig::default();
        assert_eq!(c.max_ep_iter, 10);
        assert_eq!(c.beta_max_iter, 5);
        assert!((c.delta_bounds.1 - 0.99999).abs() < 1e-12);
    }

    #[test]
    fn test_clipping() {
        let c = InferenceConfig::default();
        assert_eq!(c.clip_heritability(0.95), 0.9);
        assert_eq!(c.clip_heritability(0.0), 0.01);
        assert_eq!(c.clip_delta(0.0), 1e-5);
        assert_eq!(c.clip_variance(1e9), 1e4);
    }
}
