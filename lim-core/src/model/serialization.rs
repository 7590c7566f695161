//! Model serialization and deserialization.
//!
//! Binary format: a bincode encoding of [`NullModel`], whose leading
//! magic bytes (LIMD) and version are checked on load.
//! Optional JSON sidecar for human inspection.

use anyhow::{bail, Context, Result};
use std::path::Path;

use super::null_model::NullModel;

/// Save a null model to a binary file (.lim.model).
pub fn save_model(model: &NullModel, path: &Path) -> Result<()> {
    let encoded = bincode::serialize(model)?;
    std::fs::write(path, &encoded)
        .with_context(|| format!("Failed to write model file {}", path.display()))?;
    Ok(())
}

/// Load a null model from a binary file (.lim.model).
pub fn load_model(path: &Path) -> Result<NullModel> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read model file {}", path.display()))?;
    if data.len() < 4 || data[..4] != NullModel::MAGIC {
        bail!(
            "Invalid model file {}: missing magic bytes {:?}",
            path.display(),
            NullModel::MAGIC
        );
    }
    let model: NullModel = bincode::deserialize(&data)?;
    if model.version > NullModel::VERSION {
        bail!(
            "Model file version {} is newer than supported version {}",
            model.version,
            NullModel::VERSION
        );
    }
    Ok(model)
}

/// Save a JSON sidecar for debugging (.lim.model.json).
pub fn save_model_json(model: &NullModel, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(model)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Summary of a null model (for display).
pub fn model_summary(model: &NullModel) -> String {
    let beta: Vec<String> = model.beta.iter().map(|b| format!("{b:.4}")).collect();
    format!(
        "LIM Null Model v{}\n\
         Likelihood: {}\n\
         Samples: {}\n\
         Covariates: {}\n\
         v: {:.6}, delta: {:.6}\n\
         Beta: [{}]\n\
         Genetic variance: {:.6}\n\
         Environmental variance: {:.6}\n\
         Covariates variance: {:.6}\n\
         Heritability: {:.4}\n\
         Log marginal likelihood: {:.6}",
        model.version,
        model.likelihood,
        model.n_samples,
        model.n_covariates,
        model.v,
        model.delta,
        beta.join(", "),
        model.genetic_variance,
        model.environmental_variance,
        model.covariates_variance,
        model.heritability,
        model.lml,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::LikelihoodKind;

    fn model() -> NullModel {
        NullModel::new(
            LikelihoodKind::Binomial,
            vec!["S1".into(), "S2".into()],
            1.1,
            0.1,
            vec![0.11],
            0.99,
            0.11,
            0.0,
            0.9,
            -144.238,
        )
    }

    #[test]
    fn test_save_load_roundtrip() {
        let model = model();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lim.model");

        save_model(&model, &path).unwrap();
        let loaded = load_model(&path).unwrap();

        assert_eq!(loaded, model);
        assert_eq!(loaded.sample_ids, vec!["S1", "S2"]);
    }

    #[test]
    fn test_load_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.model");
        std::fs::write(&path, b"not a model at all").unwrap();
        assert!(load_model(&path).is_err());
    }

    #[test]
    fn test_json_sidecar_and_summary() {
        let model = model();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.lim.model.json");
        save_model_json(&model, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"likelihood\": \"Binomial\""));

        let summary = model_summary(&model);
        assert!(summary.contains("Likelihood: binomial"));
        assert!(summary.contains("Heritability: 0.9000"));
    }
}
