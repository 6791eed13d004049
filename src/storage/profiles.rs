//! Model profile storage and loading
//!
//! A profile travels with an `.onnx` file and records everything the
//! pipeline has to agree on with the model: tensor names, class labels and
//! the full preprocessing bundle.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{Normalization, PipelineConfig};
use crate::vision::RecognizeError;

/// Myanmar digits zero through nine, in model output order
pub const MON_DIGIT_LABELS: [&str; 10] = ["၀", "၁", "၂", "၃", "၄", "၅", "၆", "၇", "၈", "၉"];

/// Description of a trained model and the preprocessing it expects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Model identifier
    pub name: String,
    /// Name of the input tensor
    pub input_name: String,
    /// Name of the output tensor
    pub output_name: String,
    /// Class symbols in output order
    pub labels: Vec<String>,
    /// Preprocessing matched to the model's training data
    pub preprocess: PipelineConfig,
}

impl ModelProfile {
    /// Profile for the shipped Mon digit CNN
    ///
    /// Trained on white-on-black, MNIST-style centered digits.
    pub fn mon_digit_cnn_v1() -> Self {
        Self {
            name: "mon_digit_cnn_v1".to_string(),
            input_name: "input".to_string(),
            output_name: "logits".to_string(),
            labels: MON_DIGIT_LABELS.iter().map(|s| s.to_string()).collect(),
            preprocess: PipelineConfig {
                background_threshold: 250.0,
                target_ink_size: 20,
                canvas_size: 28,
                binarize_threshold: 0,
                invert: true,
                recenter: true,
                normalization: Normalization { mean: 0.5, std: 0.5 },
            },
        }
    }

    /// Validate labels and preprocessing
    pub fn validate(&self) -> Result<(), RecognizeError> {
        if self.labels.is_empty() {
            return Err(RecognizeError::InvalidConfig(format!(
                "profile '{}' has no labels",
                self.name
            )));
        }
        if let Some(blank) = self.labels.iter().position(|l| l.trim().is_empty()) {
            return Err(RecognizeError::InvalidConfig(format!(
                "profile '{}' has an empty label at index {}",
                self.name, blank
            )));
        }
        self.preprocess.validate()
    }
}

/// Sidecar path for a model file (`digits.onnx` -> `digits.json`)
pub fn profile_path_for(model_path: &Path) -> PathBuf {
    model_path.with_extension("json")
}

/// Load a model profile from file
pub fn load_profile(path: &Path) -> Result<ModelProfile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile from {:?}", path))?;
    let profile: ModelProfile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse profile {:?}", path))?;
    profile
        .validate()
        .with_context(|| format!("Invalid profile {:?}", path))?;
    Ok(profile)
}

/// Save a model profile to file
pub fn save_profile(profile: &ModelProfile, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(profile)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write profile to {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_preset_is_valid() {
        let profile = ModelProfile::mon_digit_cnn_v1();
        assert!(profile.validate().is_ok());
        assert_eq!(profile.labels.len(), 10);
        assert_eq!(profile.labels[3], "၃");
        assert!(profile.preprocess.invert);
        assert!(profile.preprocess.recenter);
    }

    #[test]
    fn test_profile_path_for() {
        assert_eq!(
            profile_path_for(Path::new("/models/mon_digit_cnn_v1.onnx")),
            PathBuf::from("/models/mon_digit_cnn_v1.json")
        );
    }

    #[test]
    fn test_save_and_load_profile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("model.json");
        let profile = ModelProfile::mon_digit_cnn_v1();

        save_profile(&profile, &path).unwrap();
        let loaded = load_profile(&path).unwrap();

        assert_eq!(loaded, profile);
    }

    #[test]
    fn test_load_rejects_missing_polarity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let mut value = serde_json::to_value(ModelProfile::mon_digit_cnn_v1()).unwrap();
        value["preprocess"]
            .as_object_mut()
            .unwrap()
            .remove("invert");
        std::fs::write(&path, value.to_string()).unwrap();

        assert!(load_profile(&path).is_err());
    }

    #[test]
    fn test_empty_labels_are_invalid() {
        let mut profile = ModelProfile::mon_digit_cnn_v1();
        profile.labels.clear();
        assert!(matches!(profile.validate(), Err(RecognizeError::InvalidConfig(_))));

        let mut profile = ModelProfile::mon_digit_cnn_v1();
        profile.labels[4] = " ".to_string();
        assert!(profile.validate().is_err());
    }
}
