//! Message types sent from the prediction worker

use image::GrayImage;

use crate::vision::{Prediction, RecognizeError};

/// Progress of one prediction request
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// A snapshot was taken and the worker started
    Started,
    /// Final model canvas, before inference
    Preview(GrayImage),
    /// Inference finished
    Completed {
        prediction: Prediction,
        /// All classes, most probable first
        ranked: Vec<Prediction>,
        inference_ms: u64,
    },
    /// The request failed; reported once
    Failed(RecognizeError),
}

impl RecognizerEvent {
    /// Whether this event ends a request
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecognizerEvent::Completed { .. } | RecognizerEvent::Failed(_))
    }
}
