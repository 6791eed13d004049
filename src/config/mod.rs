//! Application Configuration
//!
//! User settings stored in TOML format, plus the preprocessing bundle that
//! has to match the model it was trained with.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::surface::SurfaceConfig;
use crate::vision::RecognizeError;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Drawing surface settings
    pub surface: SurfaceConfig,
    /// Model location settings
    pub model: ModelSettings,
    /// Result presentation settings
    pub output: OutputSettings,
}

/// Where the model and its profile come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Model file name inside the models directory, or an absolute path
    pub file: PathBuf,
    /// Profile sidecar; defaults to the model path with a `.json` extension
    pub profile: Option<PathBuf>,
    /// Download location used when the model file is missing
    pub download_url: Option<String>,
    /// Expected SHA-256 of the model file (hex)
    pub sha256: Option<String>,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from("mon_digit_cnn_v1.onnx"),
            profile: None,
            download_url: None,
            sha256: None,
            intra_threads: 1,
        }
    }
}

/// Result presentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Number of ranked alternatives to print
    pub top_k: usize,
    /// Upscale factor for saved previews
    pub preview_scale: u32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            preview_scale: 5,
        }
    }
}

/// Affine map from unit intensity to model input: `(i / 255 - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
}

/// Preprocessing tunables for one model
///
/// These are only meaningful as a set matched to the model's training
/// pipeline, so none of them has a default. Polarity and recentering in
/// particular must be stated by whoever ships the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Luma below this is ink when looking for the bounding box
    pub background_threshold: f32,
    /// Longest side of the rescaled ink, in canvas pixels
    pub target_ink_size: u32,
    /// Side length of the square model canvas
    pub canvas_size: u32,
    /// Binarization cutoff; 0 disables binarization
    pub binarize_threshold: u8,
    /// Flip polarity to light ink on a dark background
    pub invert: bool,
    /// Shift content so its intensity centroid sits at the canvas center
    pub recenter: bool,
    /// Tensor normalization constants
    pub normalization: Normalization,
}

impl PipelineConfig {
    /// Check the bundle for values no pipeline can honor
    pub fn validate(&self) -> Result<(), RecognizeError> {
        if self.canvas_size == 0 {
            return Err(RecognizeError::InvalidConfig(
                "canvas_size must be at least 1".to_string(),
            ));
        }
        if self.target_ink_size == 0 || self.target_ink_size >= self.canvas_size {
            return Err(RecognizeError::InvalidConfig(format!(
                "target_ink_size must be in 1..{} (got {})",
                self.canvas_size, self.target_ink_size
            )));
        }
        if !(self.background_threshold > 0.0 && self.background_threshold <= 255.0) {
            return Err(RecognizeError::InvalidConfig(format!(
                "background_threshold must be in (0, 255] (got {})",
                self.background_threshold
            )));
        }
        let Normalization { mean, std } = self.normalization;
        if !mean.is_finite() || !std.is_finite() || std == 0.0 {
            return Err(RecognizeError::InvalidConfig(format!(
                "normalization needs finite mean and non-zero std (got mean={}, std={})",
                mean, std
            )));
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {:?}", path))?;
    let config: AppConfig = toml::from_str(&content).context("Invalid config TOML")?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
