//! Input loading and null-model fitting shared by the subcommands.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use lim_core::config::InferenceConfig;
use lim_core::ep::EpEngine;
use lim_core::fastlmm::FastLmm;
use lim_core::likelihood::{Bernoulli, Binomial, LikelihoodFamily, LikelihoodKind, Poisson};
use lim_core::model::NullModel;
use lim_core::spectral::SpectralCovariance;
use lim_io::{parse_phenotype_file, read_matrix, PhenotypeColumns, PhenotypeData};
use lim_linalg::DenseMatrix;

#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Phenotype file path
    #[arg(long)]
    pub pheno_file: String,

    /// Outcome column name
    #[arg(long)]
    pub pheno_col: String,

    /// Trials column name (binomial likelihood)
    #[arg(long)]
    pub trials_col: Option<String>,

    /// Covariate column names (comma-separated)
    #[arg(long, default_value = "")]
    pub covar_cols: String,

    /// Sample ID column name
    #[arg(long, default_value = "IID")]
    pub sample_id_col: String,

    /// Kinship matrix file (n x n, rows in phenotype-file order)
    #[arg(long)]
    pub kinship_file: String,

    /// Likelihood: normal, bernoulli, binomial, or poisson
    #[arg(long, default_value = "bernoulli")]
    pub likelihood: String,

    /// Hyperparameter optimizer: gradient or brent
    #[arg(long, default_value = "gradient")]
    pub optimizer: String,
}

/// Complete-case samples with their design matrix and kinship spectrum.
pub struct Inputs {
    pub likelihood: LikelihoodKind,
    pub pheno: PhenotypeData,
    /// Number of data rows in the input files.
    pub n_input: usize,
    /// Complete-case row indices into the input files.
    pub rows: Vec<usize>,
    pub covariates: DenseMatrix,
    pub spectral: SpectralCovariance,
}

pub fn parse_likelihood(s: &str) -> Result<LikelihoodKind> {
    Ok(match s.to_lowercase().as_str() {
        "normal" | "gaussian" => LikelihoodKind::Normal,
        "bernoulli" | "binary" => LikelihoodKind::Bernoulli,
        "binomial" => LikelihoodKind::Binomial,
        "poisson" => LikelihoodKind::Poisson,
        _ => bail!("Unknown likelihood: {}", s),
    })
}

/// Read the phenotype table and kinship, keeping complete cases only.
pub fn load_inputs(args: &InputArgs, config: &InferenceConfig) -> Result<Inputs> {
    let likelihood = parse_likelihood(&args.likelihood)?;
    if likelihood == LikelihoodKind::Binomial && args.trials_col.is_none() {
        bail!("--trials-col is required for the binomial likelihood");
    }

    let covar_cols: Vec<String> = if args.covar_cols.is_empty() {
        Vec::new()
    } else {
        args.covar_cols.split(',').map(|s| s.trim().to_string()).collect()
    };
    let columns = PhenotypeColumns {
        sample_id: &args.sample_id_col,
        outcome: &args.pheno_col,
        trials: args.trials_col.as_deref(),
        covariates: &covar_cols,
    };
    let all = parse_phenotype_file(Path::new(&args.pheno_file), &columns)?;
    let rows = all.complete_cases();
    info!(
        "Phenotype file: {} samples, {} complete cases",
        all.n_samples(),
        rows.len()
    );
    if rows.is_empty() {
        bail!("No samples with complete phenotype and covariate data");
    }
    let pheno = all.subset(&rows);
    let covariates = pheno.design_matrix();

    let kinship = read_matrix(Path::new(&args.kinship_file))?;
    if kinship.nrows() != all.n_samples() || kinship.ncols() != all.n_samples() {
        bail!(
            "Kinship is {} x {}, expected {} x {} to match the phenotype file",
            kinship.nrows(),
            kinship.ncols(),
            all.n_samples(),
            all.n_samples()
        );
    }
    let kinship = kinship.select_rows(&rows).select_cols(&rows);
    let spectral = SpectralCovariance::from_kinship(&kinship, config)
        .context("Invalid kinship matrix")?;
    info!(
        "Kinship spectrum: rank {} of {} samples",
        spectral.rank(),
        spectral.nsamples()
    );

    Ok(Inputs {
        likelihood,
        pheno,
        n_input: all.n_samples(),
        rows,
        covariates,
        spectral,
    })
}

impl Inputs {
    /// Likelihood family over the complete-case outcome.
    pub fn family(&self) -> Result<Box<dyn LikelihoodFamily>> {
        let y = self.pheno.outcome.clone();
        Ok(match self.likelihood {
            LikelihoodKind::Bernoulli => Box::new(Bernoulli::new(y)?),
            LikelihoodKind::Binomial => {
                let trials = self
                    .pheno
                    .trials
                    .clone()
                    .context("Binomial likelihood requires a trials column")?;
                Box::new(Binomial::new(y, trials)?)
            }
            LikelihoodKind::Poisson => Box::new(Poisson::new(y)?),
            LikelihoodKind::Normal => bail!("The normal likelihood is fitted with FastLMM"),
        })
    }

    /// Build and optimize an EP engine.
    pub fn fit_ep(&self, optimizer: &str, config: &InferenceConfig) -> Result<EpEngine<'_>> {
        let mut engine = EpEngine::new(
            self.family()?,
            self.covariates.clone(),
            &self.spectral,
            config.clone(),
        )?;
        match optimizer.to_lowercase().as_str() {
            "gradient" | "lbfgs" => engine.optimize()?,
            "brent" => engine.optimize_brent()?,
            _ => bail!("Unknown optimizer: {}", optimizer),
        }
        Ok(engine)
    }

    /// Fit FastLMM on a normal outcome with the given covariates.
    pub fn fit_fastlmm(&self, covariates: &DenseMatrix, config: &InferenceConfig) -> Result<FastLmm<'_>> {
        let mut lmm = FastLmm::new(&self.pheno.outcome, covariates, &self.spectral, config.clone())?;
        lmm.learn()?;
        Ok(lmm)
    }

    /// Fit the covariates-only model and summarize it.
    pub fn fit_null_model(&self, optimizer: &str, config: &InferenceConfig) -> Result<NullModel> {
        let ids = self.pheno.sample_ids.clone();
        if self.likelihood == LikelihoodKind::Normal {
            let mut lmm = self.fit_fastlmm(&self.covariates, config)?;
            Ok(NullModel::from_fastlmm(&mut lmm, ids)?)
        } else {
            let mut engine = self.fit_ep(optimizer, config)?;
            Ok(engine.null_model(ids)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_likelihood() {
        assert_eq!(parse_likelihood("Poisson").unwrap(), LikelihoodKind::Poisson);
        assert_eq!(parse_likelihood("binary").unwrap(), LikelihoodKind::Bernoulli);
        assert!(parse_likelihood("gamma").is_err());
    }
}
