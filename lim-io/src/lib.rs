//! lim-io: plain-text input for LIM-RS
//!
//! Provides the phenotype/covariate table reader and a whitespace
//! delimited numeric matrix reader for kinship and candidate files.

pub mod matrix;
pub mod phenotype;

pub use matrix::read_matrix;
pub use phenotype::{parse_phenotype_file, PhenotypeColumns, PhenotypeData};
