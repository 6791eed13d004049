//! Recognition error taxonomy

use thiserror::Error;

/// Failures surfaced by the recognizer
///
/// Blank or degenerate drawings are not errors; they flow through the
/// pipeline and come out as a low-confidence prediction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecognizeError {
    /// The inference backend could not be initialized. Cached and re-reported.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The inference call failed or returned unusable scores
    #[error("inference failed: {0}")]
    Inference(String),

    /// The model and the preprocessing bundle disagree on the tensor contract
    #[error("model contract violation: {what} (model expects {expected}, pipeline provides {actual})")]
    ContractViolation {
        what: &'static str,
        expected: String,
        actual: String,
    },

    /// The preprocessing bundle cannot be honored
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A prediction for this surface is already in flight
    #[error("a prediction is already in progress")]
    Busy,
}

impl RecognizeError {
    /// Whether this failure will recur on every request until restart
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecognizeError::ModelUnavailable(_)
                | RecognizeError::ContractViolation { .. }
                | RecognizeError::InvalidConfig(_)
        )
    }
}
