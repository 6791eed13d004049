//! Application Coordinator
//!
//! Connects a drawing surface to the recognizer. Each request works on an
//! immutable snapshot and runs on its own worker thread; at most one request
//! per surface is in flight.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use crate::shared::{RecognizerEvent, RuntimeState};
use crate::surface::DrawingSurface;
use crate::vision::{DigitRecognizer, RecognizeError, Recognition};

/// Main application coordinator
pub struct RecognizerApp {
    surface: Arc<dyn DrawingSurface>,
    recognizer: Arc<DigitRecognizer>,
    state: Arc<RwLock<RuntimeState>>,
    events_tx: Sender<RecognizerEvent>,
    events_rx: Receiver<RecognizerEvent>,
}

impl RecognizerApp {
    /// Create a new application coordinator
    pub fn new(surface: Arc<dyn DrawingSurface>, recognizer: Arc<DigitRecognizer>) -> Self {
        let (events_tx, events_rx) = unbounded();

        Self {
            surface,
            recognizer,
            state: Arc::new(RwLock::new(RuntimeState::default())),
            events_tx,
            events_rx,
        }
    }

    /// Receiver for progress events of all requests
    pub fn events(&self) -> Receiver<RecognizerEvent> {
        self.events_rx.clone()
    }

    /// Copy of the current runtime state
    pub fn runtime(&self) -> RuntimeState {
        self.state.read().clone()
    }

    /// Whether a prediction is currently running
    pub fn is_busy(&self) -> bool {
        self.state.read().in_flight
    }

    /// Clear the surface; a running request keeps its own snapshot
    pub fn clear_surface(&self) {
        self.surface.clear();
    }

    /// Snapshot the surface and predict on a worker thread
    ///
    /// Returns [`RecognizeError::Busy`] if a request is already running.
    /// Every accepted request ends with exactly one terminal event, even if
    /// the worker panics.
    pub fn request_prediction(&self) -> Result<JoinHandle<()>, RecognizeError> {
        {
            let mut state = self.state.write();
            if state.in_flight {
                debug!("Rejecting prediction request, one is already running");
                return Err(RecognizeError::Busy);
            }
            state.in_flight = true;
        }

        let frame = self.surface.snapshot();
        let recognizer = self.recognizer.clone();
        let events = self.events_tx.clone();
        let _ = events.send(RecognizerEvent::Started);
        let mut guard = RequestGuard {
            state: self.state.clone(),
            events: events.clone(),
            settled: false,
        };

        let handle = std::thread::spawn(move || {
            let preprocessed = recognizer.pipeline().preprocess(&frame);
            let _ = events.send(RecognizerEvent::Preview(preprocessed.canvas.clone()));

            let outcome = recognizer.classify(&preprocessed);
            debug!("Request settled {:?} after capture", frame.captured_at.elapsed());
            guard.settle(outcome);
        });

        Ok(handle)
    }
}

/// Settles one in-flight request exactly once
///
/// Dropped unsettled (the worker unwound), it reports a failure so the
/// in-flight flag is released and listeners see a terminal event.
struct RequestGuard {
    state: Arc<RwLock<RuntimeState>>,
    events: Sender<RecognizerEvent>,
    settled: bool,
}

impl RequestGuard {
    fn settle(&mut self, outcome: Result<Recognition, RecognizeError>) {
        self.settled = true;
        let event = {
            let mut state = self.state.write();
            state.in_flight = false;
            match outcome {
                Ok(result) => {
                    info!("Prediction: {}", result.prediction);
                    state.record_prediction(result.prediction.clone());
                    RecognizerEvent::Completed {
                        prediction: result.prediction,
                        ranked: result.ranked,
                        inference_ms: result.inference_ms,
                    }
                }
                Err(e) => {
                    warn!("Prediction failed: {}", e);
                    state.record_failure(e.to_string());
                    RecognizerEvent::Failed(e)
                }
            }
        };
        let _ = self.events.send(event);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(Err(RecognizeError::Inference(
                "prediction worker panicked".to_string(),
            )));
        }
    }
}
