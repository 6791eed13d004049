//! Inference collaborator contract and one-time initialization
//!
//! The model is opaque to the pipeline: a tensor goes in, one raw score per
//! class comes out. Loading it is expensive, so it happens once per process.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use super::error::RecognizeError;
use super::preprocess::InkTensor;

/// A loaded model that turns an input tensor into per-class scores
pub trait Classifier: Send + Sync {
    /// Declared input shape; negative entries are dynamic
    fn input_shape(&self) -> Option<Vec<i64>>;

    /// Declared number of output classes, if the model states it
    fn class_count(&self) -> Option<usize>;

    /// Run inference, returning raw scores in the model's class order
    fn classify(&self, tensor: &InkTensor) -> Result<Vec<f32>, RecognizeError>;
}

type Loader = Box<dyn Fn() -> Result<Arc<dyn Classifier>, RecognizeError> + Send + Sync>;

/// Classifier that is loaded by its first user and shared afterwards
///
/// Concurrent first callers block on the same load and all receive its
/// outcome. A failed load is cached and reported again; it is never retried.
pub struct LazyClassifier {
    loader: Loader,
    cell: OnceLock<Result<Arc<dyn Classifier>, RecognizeError>>,
}

impl LazyClassifier {
    /// Create a handle that runs `loader` on first use
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Classifier>, RecognizeError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            cell: OnceLock::new(),
        }
    }

    /// Get the classifier, loading it if this is the first call
    pub fn get(&self) -> Result<Arc<dyn Classifier>, RecognizeError> {
        self.cell
            .get_or_init(|| {
                info!("Initializing classifier");
                let outcome = (self.loader)();
                match &outcome {
                    Ok(_) => info!("Classifier ready"),
                    Err(e) => warn!("Classifier initialization failed: {}", e),
                }
                outcome
            })
            .clone()
    }

    /// Whether initialization has completed, successfully or not
    #[cfg(test)]
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl fmt::Debug for LazyClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.cell.get() {
            None => "pending",
            Some(Ok(_)) => "ready",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("LazyClassifier").field("state", &state).finish()
    }
}

fn format_shape<T: fmt::Display>(dims: &[T]) -> String {
    let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// Check that a classifier accepts `expected_shape` and emits `label_count` scores
pub fn verify_contract(
    classifier: &dyn Classifier,
    expected_shape: [usize; 4],
    label_count: usize,
) -> Result<(), RecognizeError> {
    if let Some(shape) = classifier.input_shape() {
        let compatible = shape.len() == expected_shape.len()
            && shape
                .iter()
                .zip(expected_shape.iter())
                .all(|(&model, &ours)| model < 0 || model as usize == ours);
        if !compatible {
            return Err(RecognizeError::ContractViolation {
                what: "input shape",
                expected: format_shape(&shape),
                actual: format_shape(&expected_shape[..]),
            });
        }
    }

    if let Some(classes) = classifier.class_count() {
        if classes != label_count {
            return Err(RecognizeError::ContractViolation {
                what: "class count",
                expected: classes.to_string(),
                actual: label_count.to_string(),
            });
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::stub::StubClassifier;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_loads_once_under_concurrent_first_use() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let lazy = Arc::new(LazyClassifier::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(Arc::new(StubClassifier::new(vec![0.0; 10])) as Arc<dyn Classifier>)
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lazy = lazy.clone();
                std::thread::spawn(move || lazy.get().is_ok())
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(lazy.is_initialized());
    }

    #[test]
    fn test_failure_is_cached_not_retried() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let lazy = LazyClassifier::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RecognizeError::ModelUnavailable("no such file".to_string()))
        });

        let first = lazy.get().err().unwrap();
        let second = lazy.get().err().unwrap();

        assert_eq!(first, second);
        assert_eq!(first, RecognizeError::ModelUnavailable("no such file".to_string()));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(format!("{:?}", lazy), "LazyClassifier { state: \"failed\" }");
    }

    #[test]
    fn test_contract_accepts_dynamic_batch() {
        let stub = StubClassifier::new(vec![0.0; 10]);
        assert!(verify_contract(&stub, [1, 1, 28, 28], 10).is_ok());
    }

    #[test]
    fn test_contract_rejects_wrong_resolution() {
        let mut stub = StubClassifier::new(vec![0.0; 10]);
        stub.shape = Some(vec![1, 1, 32, 32]);

        let err = verify_contract(&stub, [1, 1, 28, 28], 10).unwrap_err();
        assert_eq!(
            err,
            RecognizeError::ContractViolation {
                what: "input shape",
                expected: "[1, 1, 32, 32]".to_string(),
                actual: "[1, 1, 28, 28]".to_string(),
            }
        );
    }

    #[test]
    fn test_contract_rejects_label_mismatch() {
        let stub = StubClassifier::new(vec![0.0; 10]);
        assert!(matches!(
            verify_contract(&stub, [1, 1, 28, 28], 26),
            Err(RecognizeError::ContractViolation { what: "class count", .. })
        ));
    }

    #[test]
    fn test_unknown_shape_is_accepted() {
        let mut stub = StubClassifier::new(vec![0.0; 10]);
        stub.shape = None;
        assert!(verify_contract(&stub, [1, 1, 28, 28], 10).is_ok());
    }
}
