//! Score candidate covariates against the fitted null model.
//!
//! lim scan --pheno-file ... --pheno-col ... --kinship-file ... --candidates-file ... --output-prefix ...
//!
//! Non-normal outcomes are scored with the frozen EP snapshot; normal
//! outcomes refit FastLMM with each candidate appended to the covariates.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;
use rayon::prelude::*;
use tracing::{debug, info};

use lim_core::config::InferenceConfig;
use lim_core::error::InferenceError;
use lim_core::likelihood::LikelihoodKind;
use lim_core::scan::ScanResult;
use lim_io::read_matrix;
use lim_linalg::DenseMatrix;

use super::inputs::{load_inputs, InputArgs, Inputs};

#[derive(Args)]
pub struct ScanArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Candidate matrix file (n x m, rows in phenotype-file order)
    #[arg(long)]
    candidates_file: String,

    /// Output file prefix
    #[arg(long)]
    output_prefix: String,
}

pub fn run(args: ScanArgs) -> Result<()> {
    info!("=== LIM: Candidate Scan ===");
    let start = Instant::now();
    let config = InferenceConfig::default();
    let inputs = load_inputs(&args.inputs, &config)?;

    let candidates = read_matrix(Path::new(&args.candidates_file))?;
    if candidates.nrows() != inputs.n_input {
        bail!(
            "Candidate file has {} rows, expected {} to match the phenotype file",
            candidates.nrows(),
            inputs.n_input
        );
    }
    let candidates = candidates.select_rows(&inputs.rows);
    info!("Scoring {} candidate(s)", candidates.ncols());

    let result = if inputs.likelihood == LikelihoodKind::Normal {
        scan_fastlmm(&inputs, &candidates, &config)?
    } else {
        let mut engine = inputs.fit_ep(&args.inputs.optimizer, &config)?;
        let fixed = engine.fixed_ep()?;
        fixed.compute(&inputs.covariates, &candidates)?
    };

    let out_path = PathBuf::from(format!("{}.scan.tsv", args.output_prefix));
    write_scan(&result, &out_path)?;
    info!(
        "Scan of {} candidate(s) finished in {:.2?}; results in {}",
        result.len(),
        start.elapsed(),
        out_path.display()
    );
    Ok(())
}

/// Refit FastLMM once per candidate.
///
/// A candidate that is constant or explained by the covariates keeps the
/// null evidence and a zero effect.
fn scan_fastlmm(inputs: &Inputs, candidates: &DenseMatrix, config: &InferenceConfig) -> Result<ScanResult> {
    let null_lml = inputs.fit_fastlmm(&inputs.covariates, config)?.lml()?;
    let p = inputs.covariates.ncols();
    let fits = (0..candidates.ncols())
        .into_par_iter()
        .map(|j| -> Result<(f64, f64)> {
            let x = candidates.select_cols(&[j]);
            match inputs.fit_fastlmm(&inputs.covariates.hstack(&x), config) {
                Ok(mut lmm) => Ok((lmm.lml()?, lmm.beta()?[p])),
                Err(e) if is_degenerate(&e) => {
                    debug!("Candidate {} is degenerate; keeping the null fit", j + 1);
                    Ok((null_lml, 0.0))
                }
                Err(e) => Err(e.context(format!("Candidate {}", j + 1))),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    let (lmls, effect_sizes) = fits.into_iter().unzip();
    Ok(ScanResult {
        null_lml,
        lmls,
        effect_sizes,
    })
}

fn is_degenerate(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<InferenceError>(),
        Some(InferenceError::DegenerateCovariates)
    )
}

fn write_scan(result: &ScanResult, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "candidate\tlml_alt\teffect_size\tlrt\tpvalue")?;
    let stats = result.lrt()?;
    for (j, stat) in stats.iter().enumerate() {
        writeln!(
            out,
            "{}\t{:.6}\t{:.6e}\t{:.6}\t{:.6e}",
            j + 1,
            result.lmls[j],
            result.effect_sizes[j],
            stat.lrt,
            stat.pvalue
        )?;
    }
    out.flush()?;
    Ok(())
}
