//! lim-core: variance-components inference for LIM-RS
//!
//! Implements the FastLMM closed-form Gaussian mixed model, expectation
//! propagation for Bernoulli, Binomial and Poisson outcomes over a
//! low-rank kinship, the frozen-snapshot candidate scan, and model
//! serialization.

pub mod config;
pub mod ep;
pub mod error;
pub mod fastlmm;
pub mod fixed;
pub mod likelihood;
pub mod model;
pub mod scan;
pub mod spectral;
pub mod util;

pub use config::InferenceConfig;
pub use ep::EpEngine;
pub use error::{InferenceError, Result};
pub use fastlmm::FastLmm;
pub use fixed::FixedEp;
pub use scan::{LrtStat, ScanResult};
pub use spectral::SpectralCovariance;
