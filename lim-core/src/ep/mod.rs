//! Expectation propagation for variance-components GLMMs.
//!
//! [`EpEngine`] approximates the posterior of the latent field under a
//! Bernoulli, Binomial or Poisson likelihood, evaluates the approximate
//! log marginal likelihood with its gradients, and optimizes the
//! hyperparameters. A converged engine can be frozen into a
//! [`FixedEp`](crate::fixed::FixedEp) for fast candidate scans.

pub mod cache;
pub mod engine;
pub mod evidence;
pub mod factor;
pub mod init;
pub mod optimize;

pub use engine::{EpEngine, NaturalParams};
pub use evidence::LmlComponents;
pub use init::Whitening;
