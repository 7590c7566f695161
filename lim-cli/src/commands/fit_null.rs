//! Fit the covariates-only model.
//!
//! lim fit-null --pheno-file ... --pheno-col ... --kinship-file ... --likelihood binomial --trials-col n --output-prefix ...

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Args;
use tracing::info;

use lim_core::config::InferenceConfig;
use lim_core::model::serialization;

use super::inputs::{load_inputs, InputArgs};

#[derive(Args)]
pub struct FitNullArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Output file prefix
    #[arg(long)]
    output_prefix: String,

    /// Also save JSON sidecar for debugging
    #[arg(long, default_value = "false")]
    save_json: bool,
}

pub fn run(args: FitNullArgs) -> Result<()> {
    info!("=== LIM: Fit Null Model ===");
    info!("Phenotype file: {}", args.inputs.pheno_file);
    info!("Outcome column: {}", args.inputs.pheno_col);
    info!("Likelihood: {}", args.inputs.likelihood);

    let start = Instant::now();
    let config = InferenceConfig::default();
    let inputs = load_inputs(&args.inputs, &config)?;
    let model = inputs.fit_null_model(&args.inputs.optimizer, &config)?;
    info!("Null model fitted in {:.2?}", start.elapsed());

    let model_path = PathBuf::from(format!("{}.lim.model", args.output_prefix));
    serialization::save_model(&model, &model_path)?;
    info!("Model saved to {}", model_path.display());

    if args.save_json {
        let json_path = PathBuf::from(format!("{}.lim.model.json", args.output_prefix));
        serialization::save_model_json(&model, &json_path)?;
        info!("JSON sidecar saved to {}", json_path.display());
    }

    println!("{}", serialization::model_summary(&model));
    Ok(())
}
