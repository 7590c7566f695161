//! NullModel: the fitted covariates-only model.
//!
//! Holds the hyperparameters and variance decomposition of either an EP
//! fit (Bernoulli, Binomial, Poisson) or a FastLMM fit (normal outcome),
//! in sample order.

use serde::{Deserialize, Serialize};

use crate::ep::EpEngine;
use crate::error::{InferenceError, Result};
use crate::fastlmm::FastLmm;
use crate::likelihood::LikelihoodKind;

/// The fitted null model, serialized to .lim.model files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullModel {
    /// Magic bytes for validation.
    pub magic: [u8; 4],
    /// Version number for forward compatibility.
    pub version: u32,
    pub likelihood: LikelihoodKind,
    /// Sample IDs in model order.
    pub sample_ids: Vec<String>,
    pub n_samples: usize,
    /// Number of covariates (including intercept).
    pub n_covariates: usize,
    /// Total variance of the latent field.
    pub v: f64,
    /// Fraction of v that is unstructured.
    pub delta: f64,
    /// Covariate effect sizes.
    pub beta: Vec<f64>,
    pub genetic_variance: f64,
    pub environmental_variance: f64,
    /// Empirical variance explained by the covariates.
    pub covariates_variance: f64,
    pub heritability: f64,
    /// Log marginal likelihood (EP approximation for non-normal outcomes).
    pub lml: f64,
}

impl NullModel {
    /// Magic bytes: "LIMD" (LIM moDel).
    pub const MAGIC: [u8; 4] = [b'L', b'I', b'M', b'D'];
    /// Current model version.
    pub const VERSION: u32 = 1;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        likelihood: LikelihoodKind,
        sample_ids: Vec<String>,
        v: f64,
        delta: f64,
        beta: Vec<f64>,
        genetic_variance: f64,
        environmental_variance: f64,
        covariates_variance: f64,
        heritability: f64,
        lml: f64,
    ) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            likelihood,
            n_samples: sample_ids.len(),
            n_covariates: beta.len(),
            sample_ids,
            v,
            delta,
            beta,
            genetic_variance,
            environmental_variance,
            covariates_variance,
            heritability,
            lml,
        }
    }

    /// Snapshot a FastLMM fit of a normal outcome.
    pub fn from_fastlmm(lmm: &mut FastLmm<'_>, sample_ids: Vec<String>) -> Result<Self> {
        check_ids(&sample_ids, lmm.nsamples())?;
        Ok(Self::new(
            LikelihoodKind::Normal,
            sample_ids,
            lmm.scale()?,
            lmm.delta(),
            lmm.beta()?,
            lmm.genetic_variance()?,
            lmm.environmental_variance()?,
            lmm.fixed_effects_variance()?,
            lmm.heritability()?,
            lmm.lml()?,
        ))
    }

    /// Sum of the genetic, environmental and covariate variances.
    pub fn total_variance(&self) -> f64 {
        self.genetic_variance + self.environmental_variance + self.covariates_variance
    }
}

impl EpEngine<'_> {
    /// Snapshot the current EP fit.
    pub fn null_model(&mut self, sample_ids: Vec<String>) -> Result<NullModel> {
        check_ids(&sample_ids, self.nsamples())?;
        let lml = self.lml()?;
        Ok(NullModel::new(
            self.kind(),
            sample_ids,
            self.v(),
            self.delta(),
            self.beta(),
            self.genetic_variance(),
            self.environmental_variance(),
            self.covariates_variance(),
            self.heritability(),
            lml,
        ))
    }
}

fn check_ids(sample_ids: &[String], n: usize) -> Result<()> {
    if sample_ids.len() != n {
        return Err(InferenceError::SampleCountMismatch {
            what: "sample IDs",
            expected: n,
            got: sample_ids.len(),
        });
    }
    Ok(())
}
