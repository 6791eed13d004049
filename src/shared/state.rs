//! Runtime state shared between the coordinator and its workers

use crate::vision::Prediction;

/// Runtime state that is not persisted
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    /// Whether a prediction is currently running
    pub in_flight: bool,
    /// Most recent successful prediction
    pub last_prediction: Option<Prediction>,
    /// Last error message (if any)
    pub last_error: Option<String>,
    /// Number of requests that reached a terminal outcome
    pub served: u64,
}

impl RuntimeState {
    /// Clear any error state
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Set an error message
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Record a finished prediction
    pub fn record_prediction(&mut self, prediction: Prediction) {
        self.last_prediction = Some(prediction);
        self.clear_error();
        self.served += 1;
    }

    /// Record a failed request
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.set_error(error);
        self.served += 1;
    }
}
