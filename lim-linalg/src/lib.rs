//! lim-linalg: Linear algebra wrappers for lim-rs
//!
//! Provides dense matrix operations and the decompositions used by
//! the mixed-model engines: Cholesky with triangular solves, QR least
//! squares, symmetric eigendecomposition and thin SVD.

pub mod dense;
pub mod decomposition;

pub use dense::DenseMatrix;
pub use decomposition::{CholeskyDecomp, LinalgError, SymmetricEigen, ThinSvd};
