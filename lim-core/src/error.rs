//! Error taxonomy for the inference engines.
//!
//! Only fatal conditions are represented here. Recoverable situations
//! (an EP sweep cap without convergence, an ill-conditioned beta solve)
//! are logged and never returned.

use lim_linalg::LinalgError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Spectral decomposition contains non-finite values")]
    NonFiniteSpectrum,

    #[error("Covariance is not positive definite (smallest eigenvalue {min_eigenvalue:.3e})")]
    NotPositiveDefinite { min_eigenvalue: f64 },

    #[error("Covariance is ill-conditioned (condition number {condition:.3e} exceeds {limit:.3e})")]
    IllConditioned { condition: f64, limit: f64 },

    #[error("Sample count mismatch for {what}: expected {expected}, got {got}")]
    SampleCountMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Outcome contains non-finite values")]
    NonFinitePhenotype,

    #[error("Outcome has a single unique value")]
    SingletonPhenotype,

    #[error("Outcome variance {variance:.3e} is below the floor {floor:.3e}")]
    PhenotypeVarianceTooLow { variance: f64, floor: f64 },

    #[error("Invalid outcome at sample {index}: {reason}")]
    InvalidOutcome { index: usize, reason: String },

    #[error("Invalid hyperparameter {name} = {value}")]
    InvalidHyperparameter { name: &'static str, value: f64 },

    #[error("Tilted moments diverged at sample {index} (mean {mean}, variance {variance})")]
    TiltedMoments {
        index: usize,
        mean: f64,
        variance: f64,
    },

    #[error("Covariate matrix is rank deficient or ill-conditioned")]
    DegenerateCovariates,

    #[error("Optimization failed: {0}")]
    Optimization(String),

    #[error(transparent)]
    Linalg(#[from] LinalgError),
}

pub type Result<T> = std::result::Result<T, InferenceError>;
