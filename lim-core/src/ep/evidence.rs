//! EP approximation of the log marginal likelihood and its gradients.

use super::cache::Derived;
use super::engine::EpEngine;
use crate::error::Result;
use crate::fixed::FixedEp;
use crate::util::math::{compensated_sum, dot};

/// The seven closed-form terms of the EP evidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmlComponents {
    /// `-sum log diag L - 1/2 sum log(s2b S) + 1/2 sum log A`.
    pub log_det: f64,
    /// Quadratic form in the site means.
    pub site_quadratic: f64,
    /// Quadratic form in the cavity means.
    pub cavity_quadratic: f64,
    /// Cross term between the prior mean and the sites.
    pub mean_site: f64,
    /// Quadratic form in the prior mean.
    pub mean_quadratic: f64,
    /// Log-ratio of site, cavity and tilted precisions.
    pub precision_ratio: f64,
    /// Sum of tilted log-normalizers.
    pub log_normalizers: f64,
}

impl LmlComponents {
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.log_det,
            self.site_quadratic,
            self.cavity_quadratic,
            self.mean_site,
            self.mean_quadratic,
            self.precision_ratio,
            self.log_normalizers,
        ]
    }

    /// Compensated sum of all terms.
    pub fn total(&self) -> f64 {
        compensated_sum(self.as_array())
    }

    /// Terms that do not depend on the prior mean.
    pub fn mean_free(&self) -> f64 {
        compensated_sum([
            self.log_det,
            self.site_quadratic,
            self.cavity_quadratic,
            self.precision_ratio,
            self.log_normalizers,
        ])
    }
}

impl EpEngine<'_> {
    /// Evidence terms at the converged EP approximation.
    pub fn lml_components(&mut self) -> Result<LmlComponents> {
        self.update()?;
        if let (false, Some(c)) = (self.dirty.is_dirty(Derived::Evidence), self.evidence) {
            return Ok(c);
        }

        let m = self.mean().to_vec();
        let q0 = self.q0();
        let s0 = self.spectral.s0();
        let s2b = self.sigma2_b();
        let s2e = self.sigma2_epsilon();
        self.ensure_factor()?;
        let factor = self.site_factor()?;
        let (a, c) = (&factor.a, &factor.c);
        let (ttau, teta) = (&self.sites.tau, &self.sites.eta);
        let (ctau, ceta) = (&self.cavity.tau, &self.cavity.eta);
        let n = m.len();

        let tctau: Vec<f64> = ttau.iter().zip(ctau).map(|(t, c)| t + c).collect();
        let cmu: Vec<f64> = ceta.iter().zip(ctau).map(|(e, t)| e / t).collect();
        let am: Vec<f64> = a.iter().zip(&m).map(|(a, m)| a * m).collect();
        let ct: Vec<f64> = c.iter().zip(teta).map(|(c, t)| c * t).collect();
        let qb_ct = factor.qbiqt(q0, &ct);
        let qb_am = factor.qbiqt(q0, &am);

        let log_det = -factor.half_log_det()
            - 0.5 * s0.iter().map(|s| (s2b * s).ln()).sum::<f64>()
            + 0.5 * a.iter().map(|x| x.ln()).sum::<f64>();

        let site_quadratic = 0.5
            * (0..n)
                .map(|i| teta[i] * (s2e * c[i] * teta[i] + c[i] * qb_ct[i] - teta[i] / tctau[i]))
                .sum::<f64>();

        let cavity_quadratic = 0.5
            * (0..n)
                .map(|i| ceta[i] * (ttau[i] * cmu[i] - 2.0 * teta[i]) / tctau[i])
                .sum::<f64>();

        let mc: Vec<f64> = m.iter().zip(c).map(|(m, c)| m * c).collect();
        let mean_site = dot(&mc, teta) - dot(&am, &qb_ct);
        let mean_quadratic = -0.5 * dot(&am, &m) + 0.5 * dot(&am, &qb_am);

        let precision_ratio = 0.5
            * (-ttau.iter().map(|t| t.ln()).sum::<f64>()
                + tctau.iter().map(|t| t.ln()).sum::<f64>()
                - ctau.iter().map(|t| t.ln()).sum::<f64>());

        let log_normalizers = compensated_sum(self.moments.log_z.iter().copied());

        let components = LmlComponents {
            log_det,
            site_quadratic,
            cavity_quadratic,
            mean_site,
            mean_quadratic,
            precision_ratio,
            log_normalizers,
        };
        self.evidence = Some(components);
        self.dirty.mark_clean(Derived::Evidence);
        Ok(components)
    }

    /// EP approximation of the log marginal likelihood.
    pub fn lml(&mut self) -> Result<f64> {
        Ok(self.lml_components()?.total())
    }

    /// Freeze the converged approximation for candidate scans.
    pub fn fixed_ep(&mut self) -> Result<FixedEp> {
        let components = self.lml_components()?;
        let q0 = self.q0();
        let factor = self.site_factor()?.clone();
        let site_eta = self.sites.eta.clone();
        Ok(FixedEp::from_parts(
            components.mean_free(),
            factor,
            q0.clone(),
            site_eta,
            self.config.degenerate_tol,
        ))
    }

    /// `d lml / d theta` for `dK = alpha Q S Q' + beta I`, holding the
    /// sites fixed.
    fn gradient_along(&mut self, alpha: f64, beta: f64) -> Result<f64> {
        self.update()?;
        let m = self.mean().to_vec();
        let q0 = self.q0();
        let s0 = self.spectral.s0();
        let s2b = self.sigma2_b();
        self.ensure_factor()?;
        let factor = self.site_factor()?;
        let (a, c) = (&factor.a, &factor.c);
        let teta = &self.sites.eta;

        let am: Vec<f64> = a.iter().zip(&m).map(|(a, m)| a * m).collect();
        let ct: Vec<f64> = c.iter().zip(teta).map(|(c, t)| c * t).collect();
        let qb_am = factor.qbiqt(q0, &am);
        let qb_ct = factor.qbiqt(q0, &ct);

        let u: Vec<f64> = (0..m.len())
            .map(|i| (am[i] - a[i] * qb_am[i]) - (ct[i] - a[i] * qb_ct[i]))
            .collect();
        let qtu = q0.t_mat_vec(&u);
        let udku = alpha * qtu.iter().zip(s0).map(|(x, s)| s * x * x).sum::<f64>() + beta * dot(&u, &u);

        let trace: f64 = a
            .iter()
            .zip(&factor.q)
            .map(|(a, q)| a * (beta * (1.0 - a * q) + alpha / s2b * q))
            .sum();

        Ok(0.5 * udku - 0.5 * trace)
    }

    /// Gradient of the evidence with respect to v.
    pub fn gradient_over_v(&mut self) -> Result<f64> {
        let delta = self.delta;
        self.gradient_along(1.0 - delta, delta)
    }

    /// Gradient of the evidence with respect to `(v, delta)`.
    pub fn gradient_over_both(&mut self) -> Result<(f64, f64)> {
        let dv = self.gradient_over_v()?;
        let v = self.v;
        let dd = self.gradient_along(-v, v)?;
        Ok((dv, dd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_sums() {
        let c = LmlComponents {
            log_det: 1.0,
            site_quadratic: 2.0,
            cavity_quadratic: 3.0,
            mean_site: 4.0,
            mean_quadratic: 5.0,
            precision_ratio: 6.0,
            log_normalizers: 7.0,
        };
        assert_eq!(c.total(), 28.0);
        assert_eq!(c.mean_free(), 19.0);
    }
}
