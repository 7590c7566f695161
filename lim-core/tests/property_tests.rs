//! Property-based tests using proptest.
//!
//! These tests verify invariants that must hold for all valid inputs:
//!   - FastLMM evidence equals the dense Gaussian log-density
//!   - EP site precisions stay positive and the evidence stays finite
//!   - Scan statistics are well formed and degenerate candidates are inert
//!   - Tilted moments are exact for Gaussian likelihoods

use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use lim_core::config::InferenceConfig;
use lim_core::ep::EpEngine;
use lim_core::fastlmm::FastLmm;
use lim_core::likelihood::moments::{tilted_site, LogLikDerivs, Quadrature};
use lim_core::spectral::SpectralCovariance;
use lim_linalg::decomposition::inverse_spd;
use lim_linalg::{CholeskyDecomp, DenseMatrix};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

/// Well-conditioned kinship `G G' / p + 0.5 I` from a seeded random G.
fn random_spectral(n: usize, rng: &mut ChaCha8Rng) -> SpectralCovariance {
    let p = n + 2;
    let g = DenseMatrix::from_fn(n, p, |_, _| rng.gen_range(-1.0..1.0));
    let mut k = g.mat_mul(&g.transpose()).scale(1.0 / p as f64);
    k.add_to_diag(0.5);
    SpectralCovariance::from_kinship(&k, &InferenceConfig::default()).unwrap()
}

fn intercept_and_covariate(n: usize, rng: &mut ChaCha8Rng) -> DenseMatrix {
    DenseMatrix::from_fn(n, 2, |_, j| if j == 0 { 1.0 } else { rng.gen_range(-1.0..1.0) })
}

// ---------------------------------------------------------------------------
// 1. FastLMM evidence equals the dense multivariate normal log-density
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_fastlmm_lml_matches_dense(
        n in 5usize..15,
        delta in 0.05f64..0.95,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sc = random_spectral(n, &mut rng);
        let m = intercept_and_covariate(n, &mut rng);
        let y: Vec<f64> = (0..n).map(|_| rng.gen_range(-2.0..2.0)).collect();

        let mut lmm = FastLmm::new(&y, &m, &sc, InferenceConfig::default()).unwrap();
        lmm.set_delta(delta).unwrap();
        let beta = lmm.beta().unwrap();
        let scale = lmm.scale().unwrap();

        let mut cov = sc.kinship().scale((1.0 - delta) * scale);
        cov.add_to_diag(delta * scale);
        let inv = inverse_spd(&cov).unwrap();
        let chol = CholeskyDecomp::new(&cov).unwrap();
        let mean = m.mat_vec(&beta);
        let r: Vec<f64> = y.iter().zip(&mean).map(|(a, b)| a - b).collect();
        let quad = DenseMatrix::dot(&r, &inv.mat_vec(&r));
        let dense = -0.5 * (n as f64 * (2.0 * std::f64::consts::PI).ln() + quad)
            - chol.half_log_det();

        let lml = lmm.lml().unwrap();
        prop_assert!((lml - dense).abs() < 1e-7 * (1.0 + dense.abs()),
            "fast {} vs dense {}", lml, dense);
    }
}

// ---------------------------------------------------------------------------
// 2. EP sites stay positive and the evidence is finite
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_poisson_ep_sites_positive(
        n in 4usize..12,
        v in 0.1f64..3.0,
        delta in 0.0f64..0.9,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sc = random_spectral(n, &mut rng);
        let mut counts: Vec<f64> = (0..n).map(|_| rng.gen_range(0..8) as f64).collect();
        counts[0] = 0.0;
        counts[1] = 3.0;

        let mut ep = EpEngine::poisson(counts, DenseMatrix::full(n, 1, 1.0), &sc).unwrap();
        ep.set_v(v).unwrap();
        ep.set_delta(delta).unwrap();
        ep.set_beta(&[0.5]).unwrap();

        let lml = ep.lml().unwrap();
        prop_assert!(lml.is_finite());
        prop_assert!(ep.site_params().unwrap().tau.iter().all(|&t| t > 0.0));
        prop_assert!(ep.joint_params().unwrap().tau.iter().all(|&t| t > 0.0));
    }

    #[test]
    fn prop_binomial_ep_lml_is_finite(
        n in 4usize..12,
        v in 0.1f64..3.0,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sc = random_spectral(n, &mut rng);
        let trials: Vec<f64> = (0..n).map(|_| rng.gen_range(1..20) as f64).collect();
        let mut successes: Vec<f64> = trials
            .iter()
            .map(|&t| rng.gen_range(0..=(t as u32)) as f64)
            .collect();
        successes[0] = 0.0;
        successes[1] = trials[1];

        let mut ep = EpEngine::binomial(successes, trials, DenseMatrix::full(n, 1, 1.0), &sc)
            .unwrap();
        ep.set_v(v).unwrap();
        let lml = ep.lml().unwrap();
        prop_assert!(lml.is_finite());
        let h2 = ep.heritability();
        prop_assert!(h2 > 0.0 && h2 < 1.0);
    }
}

// ---------------------------------------------------------------------------
// 3. Fixed-snapshot scans: p-values in [0, 1], constant candidates inert
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_scan_pvalues_in_unit_interval(
        n in 6usize..14,
        ncand in 1usize..5,
        constant in -3.0f64..3.0,
        seed in 0u64..1000,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sc = random_spectral(n, &mut rng);
        let m = intercept_and_covariate(n, &mut rng);
        let mut y: Vec<f64> = (0..n).map(|_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 }).collect();
        y[0] = 0.0;
        y[1] = 1.0;

        let mut ep = EpEngine::bernoulli(y, m.clone(), &sc).unwrap();
        let fixed = ep.fixed_ep().unwrap();

        let mut cands = DenseMatrix::from_fn(n, ncand, |_, _| rng.gen_range(-1.0..1.0));
        cands = cands.hstack(&DenseMatrix::full(n, 1, constant));
        let res = fixed.compute(&m, &cands).unwrap();

        prop_assert!(res.null_lml.is_finite());
        for (lml, effect) in res.lmls.iter().zip(&res.effect_sizes) {
            prop_assert!(lml.is_finite());
            prop_assert!(effect.is_finite());
            prop_assert!(*lml >= res.null_lml - 1e-9);
        }
        prop_assert_eq!(res.effect_sizes[ncand], 0.0);
        prop_assert_eq!(res.lmls[ncand], res.null_lml);
        for stat in res.lrt().unwrap() {
            prop_assert!(stat.lrt >= 0.0);
            prop_assert!((0.0..=1.0).contains(&stat.pvalue));
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Tilted moments are exact under a Gaussian likelihood
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_gaussian_tilted_moments_exact(
        obs in -5.0f64..5.0,
        noise in 0.1f64..4.0,
        tau in 0.05f64..10.0,
        eta in -10.0f64..10.0,
    ) {
        let loglik = |z: f64| LogLikDerivs {
            value: -0.5 * (obs - z) * (obs - z) / noise - 0.5 * (2.0 * std::f64::consts::PI * noise).ln(),
            d1: (obs - z) / noise,
            d2: -1.0 / noise,
        };
        let quad = Quadrature { points: 1001, width: 40.0 };
        let site = tilted_site(loglik, tau, eta, quad);

        let post_tau = tau + 1.0 / noise;
        let post_mean = (eta + obs / noise) / post_tau;
        prop_assert!((site.mean - post_mean).abs() < 1e-6 * (1.0 + post_mean.abs()));
        prop_assert!((site.variance - 1.0 / post_tau).abs() < 1e-6 / post_tau);

        // log Z is the density of obs under N(eta / tau, 1 / tau + noise)
        let prior_mean = eta / tau;
        let var = 1.0 / tau + noise;
        let log_z = -0.5 * (obs - prior_mean).powi(2) / var
            - 0.5 * (2.0 * std::f64::consts::PI * var).ln();
        prop_assert!((site.log_z - log_z).abs() < 1e-6 * (1.0 + log_z.abs()));
    }
}
