//! Model management for ONNX Runtime
//!
//! Handles locating, downloading, verifying and loading the digit model.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::classifier::Classifier;
use super::error::RecognizeError;
use super::preprocess::InkTensor;
use crate::config::ModelSettings;

/// Environment variable that forbids network access for model downloads
pub const OFFLINE_ENV: &str = "MON_DIGITS_OFFLINE";

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a model manager rooted in the application data directory
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self { models_dir })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Resolve a configured model file; absolute paths are used as-is
    pub fn model_path(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.models_dir.join(file)
        }
    }

    /// Return the model path, downloading the file first if it is missing
    pub fn ensure_model(&self, settings: &ModelSettings) -> Result<PathBuf> {
        let path = self.model_path(&settings.file);

        if path.exists() {
            if let Some(expected) = &settings.sha256 {
                verify_checksum(&path, expected)?;
            }
            info!("Model available at {:?}", path);
            return Ok(path);
        }

        let Some(url) = &settings.download_url else {
            anyhow::bail!("Model file {:?} not found and no download_url is configured", path);
        };

        if std::env::var(OFFLINE_ENV).is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download model. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading model from {}", url);
        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        rt.block_on(download_file(url, &path, settings.sha256.as_deref()))?;
        info!("Successfully downloaded model to {:?}", path);

        Ok(path)
    }
}

/// Stream `url` to a temp file next to `path`, verify, then move into place
async fn download_file(url: &str, path: &Path, expected_sha256: Option<&str>) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    debug!("Download size: {:?} bytes", total_size);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);
    debug!("Downloaded {} bytes", downloaded);

    let hash = format!("{:x}", hasher.finalize());
    if let Some(expected) = expected_sha256 {
        if !hash.eq_ignore_ascii_case(expected) {
            std::fs::remove_file(&temp_path).ok();
            anyhow::bail!("Checksum mismatch for {}: expected {}, got {}", url, expected, hash);
        }
        info!("Checksum verified");
    }

    std::fs::rename(&temp_path, path)
        .context("Failed to move downloaded file to final location")?;

    Ok(())
}

/// Hex SHA-256 of a file
pub fn file_sha256(path: &Path) -> Result<String> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fail if the file's SHA-256 differs from `expected`
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let hash = file_sha256(path)?;
    if !hash.eq_ignore_ascii_case(expected) {
        anyhow::bail!("Checksum mismatch for {:?}: expected {}, got {}", path, expected, hash);
    }
    Ok(())
}

fn build_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads.max(1))?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;
    Ok(session)
}

/// Digit classifier backed by an ONNX Runtime session
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_shape: Option<Vec<i64>>,
    class_count: Option<usize>,
}

impl OnnxClassifier {
    /// Load a model, binding the named input/output
    ///
    /// Names the model does not declare fall back to its first input/output.
    pub fn load(
        model_path: &Path,
        input_name: &str,
        output_name: &str,
        intra_threads: usize,
    ) -> Result<Self, RecognizeError> {
        info!("Loading ONNX model from {:?}", model_path);
        let session = build_session(model_path, intra_threads)
            .map_err(|e| RecognizeError::ModelUnavailable(format!("{:#}", e)))?;

        let input = session
            .inputs
            .iter()
            .find(|i| i.name == input_name)
            .or_else(|| session.inputs.first())
            .ok_or_else(|| RecognizeError::ModelUnavailable("model declares no inputs".to_string()))?;
        let output = session
            .outputs
            .iter()
            .find(|o| o.name == output_name)
            .or_else(|| session.outputs.first())
            .ok_or_else(|| RecognizeError::ModelUnavailable("model declares no outputs".to_string()))?;

        if input.name != input_name {
            warn!("Model has no input '{}', using '{}'", input_name, input.name);
        }
        if output.name != output_name {
            warn!("Model has no output '{}', using '{}'", output_name, output.name);
        }

        let input_shape = input
            .input_type
            .tensor_shape()
            .map(|shape| shape.iter().copied().collect::<Vec<i64>>());
        let class_count = output
            .output_type
            .tensor_shape()
            .and_then(|shape| shape.last().copied())
            .filter(|&d| d > 0)
            .map(|d| d as usize);

        info!(
            "Model loaded. Input '{}' {:?}, output '{}' with {:?} classes",
            input.name, input_shape, output.name, class_count
        );

        let input_name = input.name.clone();
        let output_name = output.name.clone();

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_shape,
            class_count,
        })
    }
}

fn inference_error(e: impl std::fmt::Display) -> RecognizeError {
    RecognizeError::Inference(e.to_string())
}

impl Classifier for OnnxClassifier {
    fn input_shape(&self) -> Option<Vec<i64>> {
        self.input_shape.clone()
    }

    fn class_count(&self) -> Option<usize> {
        self.class_count
    }

    fn classify(&self, tensor: &InkTensor) -> Result<Vec<f32>, RecognizeError> {
        let input = Tensor::from_array((tensor.shape(), tensor.to_vec())).map_err(inference_error)?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(inference_error)?;
        let (_, scores) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;

        Ok(scores.to_vec())
    }
}
