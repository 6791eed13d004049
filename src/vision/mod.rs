//! Vision Layer
//!
//! Turns a snapshot of the drawing surface into a model tensor and the
//! tensor into a ranked digit prediction:
//!
//! ```text
//! InkFrame -> bounds -> crop/scale/place -> tone -> recenter -> tensor -> classifier -> softmax
//! ```
//!
//! Every stage after the snapshot is a pure function of its input and the
//! [`PipelineConfig`] bundle.

pub mod bounds;
pub mod centroid;
pub mod classifier;
pub mod error;
pub mod models;
pub mod placement;
pub mod preprocess;
pub mod ranking;
pub mod tone;

use image::GrayImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::storage::profiles::ModelProfile;
use crate::surface::InkFrame;

pub use bounds::BoundingBox;
pub use centroid::Centroid;
pub use classifier::{verify_contract, Classifier, LazyClassifier};
pub use error::RecognizeError;
pub use models::{ModelManager, OnnxClassifier};
pub use preprocess::InkTensor;
pub use ranking::Prediction;

/// `Math.round`: nearest integer, halves toward positive infinity
pub(crate) fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Intermediate results of preprocessing one frame
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Tight ink box, `None` when the frame was blank
    pub bounds: Option<BoundingBox>,
    /// Size of the rescaled ink on the canvas
    pub resized: (u32, u32),
    /// Top-left of the rescaled ink before recentering
    pub offset: (u32, u32),
    /// Final single-channel canvas, after tone and recentering
    pub canvas: GrayImage,
    /// Centroid before recentering
    pub centroid: Option<Centroid>,
    /// Recentering shift that was applied
    pub shift: (i32, i32),
    /// Model input
    pub tensor: InkTensor,
}

/// Deterministic preprocessing for one model
#[derive(Debug, Clone)]
pub struct InkPipeline {
    config: PipelineConfig,
}

impl InkPipeline {
    /// Create a pipeline, rejecting configurations it cannot honor
    pub fn new(config: PipelineConfig) -> Result<Self, RecognizeError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Shape of the tensors this pipeline produces
    pub fn tensor_shape(&self) -> [usize; 4] {
        let side = self.config.canvas_size as usize;
        [1, 1, side, side]
    }

    /// Run every pixel stage on a frame
    ///
    /// A blank frame is not an error: the whole raster stands in for the ink box.
    pub fn preprocess(&self, frame: &InkFrame) -> Preprocessed {
        let cfg = &self.config;
        let image = frame.image();
        let (width, height) = frame.dimensions();

        let bounds = bounds::find_ink_bounds(image, cfg.background_threshold);
        let crop = bounds.unwrap_or_else(|| {
            debug!("No ink found, using full {}x{} raster", width, height);
            BoundingBox::full(width, height)
        });

        let placed =
            placement::scale_and_place(image, &crop, cfg.target_ink_size, cfg.canvas_size);

        let tone = tone::ToneSettings {
            threshold: cfg.binarize_threshold,
            invert: cfg.invert,
        };
        let toned = tone::apply_tone(&placed.canvas, tone);

        let (canvas, centroid, shift) = if cfg.recenter {
            let r = centroid::recenter(&toned, tone.background_intensity());
            (r.image, r.centroid, r.shift)
        } else {
            (toned, None, (0, 0))
        };

        let tensor = preprocess::canvas_to_tensor(&canvas, &cfg.normalization);

        Preprocessed {
            bounds,
            resized: placed.resized,
            offset: placed.offset,
            canvas,
            centroid,
            shift,
            tensor,
        }
    }
}

/// Outcome of a successful recognition
#[derive(Debug, Clone)]
pub struct Recognition {
    /// Most probable class
    pub prediction: Prediction,
    /// All classes, most probable first
    pub ranked: Vec<Prediction>,
    /// Time spent in the classifier
    pub inference_ms: u64,
}

/// Pipeline, labels and a lazily loaded classifier
pub struct DigitRecognizer {
    pipeline: InkPipeline,
    labels: Vec<String>,
    classifier: LazyClassifier,
}

impl DigitRecognizer {
    /// Create a recognizer whose classifier is built by `loader` on first use
    ///
    /// The loaded classifier is checked against the pipeline's tensor shape
    /// and the label count before anyone can use it.
    pub fn new<F>(
        pipeline: InkPipeline,
        labels: Vec<String>,
        loader: F,
    ) -> Result<Self, RecognizeError>
    where
        F: Fn() -> Result<Arc<dyn Classifier>, RecognizeError> + Send + Sync + 'static,
    {
        if labels.is_empty() {
            return Err(RecognizeError::InvalidConfig("label set is empty".to_string()));
        }

        let shape = pipeline.tensor_shape();
        let label_count = labels.len();
        let classifier = LazyClassifier::new(move || {
            let classifier = loader()?;
            verify_contract(classifier.as_ref(), shape, label_count)?;
            Ok(classifier)
        });

        Ok(Self {
            pipeline,
            labels,
            classifier,
        })
    }

    /// Create a recognizer from a model profile
    pub fn from_profile<F>(profile: &ModelProfile, loader: F) -> Result<Self, RecognizeError>
    where
        F: Fn() -> Result<Arc<dyn Classifier>, RecognizeError> + Send + Sync + 'static,
    {
        profile.validate()?;
        info!(
            "Using profile '{}' ({} labels, invert={}, recenter={})",
            profile.name,
            profile.labels.len(),
            profile.preprocess.invert,
            profile.preprocess.recenter
        );
        Self::new(
            InkPipeline::new(profile.preprocess)?,
            profile.labels.clone(),
            loader,
        )
    }

    pub fn pipeline(&self) -> &InkPipeline {
        &self.pipeline
    }

    /// Load and check the classifier now instead of on the first request
    pub fn warm_up(&self) -> Result<(), RecognizeError> {
        self.classifier.get().map(|_| ())
    }

    /// Classify an already preprocessed frame
    pub fn classify(&self, preprocessed: &Preprocessed) -> Result<Recognition, RecognizeError> {
        let classifier = self.classifier.get()?;

        let start = Instant::now();
        let scores = classifier.classify(&preprocessed.tensor)?;
        let inference_ms = start.elapsed().as_millis() as u64;

        let prediction = ranking::top_prediction(&scores, &self.labels)?;
        let ranked = ranking::rank(&scores, &self.labels)?;
        debug!("Predicted {} in {}ms", prediction, inference_ms);

        Ok(Recognition {
            prediction,
            ranked,
            inference_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::classifier::stub::StubClassifier;
    use super::*;
    use crate::surface::{InkSurface, SurfaceConfig, INK, PAPER};
    use image::RgbImage;

    fn surface_with_rect(size: u32, x0: u32, y0: u32, w: u32, h: u32) -> InkFrame {
        let mut image = RgbImage::from_pixel(size, size, PAPER);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                image.put_pixel(x, y, INK);
            }
        }
        InkFrame::new(image)
    }

    fn pipeline() -> InkPipeline {
        InkPipeline::new(ModelProfile::mon_digit_cnn_v1().preprocess).unwrap()
    }

    fn stub_scores() -> Vec<f32> {
        let mut scores = vec![0.0; 10];
        scores[0] = 1.0;
        scores[1] = 2.0;
        scores[2] = 3.0;
        scores
    }

    fn recognizer_with(stub: StubClassifier) -> (DigitRecognizer, Arc<StubClassifier>) {
        let stub = Arc::new(stub);
        let handle = stub.clone();
        let recognizer = DigitRecognizer::from_profile(&ModelProfile::mon_digit_cnn_v1(), move || {
            Ok(handle.clone() as Arc<dyn Classifier>)
        })
        .unwrap();
        (recognizer, stub)
    }

    fn recognize(recognizer: &DigitRecognizer, frame: &InkFrame) -> Result<Recognition, RecognizeError> {
        recognizer.classify(&recognizer.pipeline().preprocess(frame))
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_half_up(2.5), 3.0);
        assert_eq!(round_half_up(0.5), 1.0);
        assert_eq!(round_half_up(-0.5), 0.0);
        assert_eq!(round_half_up(-2.5), -2.0);
        assert_eq!(round_half_up(0.49), 0.0);
    }

    #[test]
    fn test_blank_surface_still_predicts() {
        let frame = InkSurface::new(SurfaceConfig::default()).snapshot();
        let pre = pipeline().preprocess(&frame);

        assert!(pre.bounds.is_none());
        assert!(pre.centroid.is_none());
        assert_eq!(pre.tensor.shape(), [1, 1, 28, 28]);
        assert!(pre.tensor.to_vec().iter().all(|v| (v + 1.0).abs() < 1e-6));

        let (recognizer, _) = recognizer_with(StubClassifier::new(stub_scores()));
        let result = recognizer.classify(&pre).unwrap();
        assert_eq!(result.prediction.index, 2);
    }

    #[test]
    fn test_centered_square_is_symmetric() {
        let frame = surface_with_rect(32, 14, 14, 4, 4);
        let pre = pipeline().preprocess(&frame);

        assert_eq!(pre.bounds.unwrap().as_tuple(), (14, 14, 4, 4));
        assert_eq!(pre.resized, (20, 20));
        assert_eq!(pre.offset, (4, 4));
        assert_eq!(pre.shift, (0, 0));

        // 20x20 block at offset 4
        assert_eq!(pre.canvas.get_pixel(4, 4).0[0], 255);
        assert_eq!(pre.canvas.get_pixel(23, 23).0[0], 255);
        assert_eq!(pre.canvas.get_pixel(3, 4).0[0], 0);
        assert_eq!(pre.canvas.get_pixel(24, 23).0[0], 0);

        for y in 0..28 {
            for x in 0..28 {
                let v = pre.tensor.get(x, y).unwrap();
                let mirrored = pre.tensor.get(27 - x, 27 - y).unwrap();
                assert_eq!(v, mirrored, "asymmetry at ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_corner_ink_is_centered() {
        let frame = surface_with_rect(64, 0, 0, 2, 6);
        let pre = pipeline().preprocess(&frame);

        assert_eq!(pre.bounds.unwrap().as_tuple(), (0, 0, 2, 6));
        // 7x20 block at (10, 4): centroid (13.5, 14.0) needs no shift
        assert_eq!(pre.resized, (7, 20));
        assert_eq!(pre.offset, (10, 4));
        assert_eq!(pre.shift, (0, 0));

        let c = centroid::intensity_centroid(&pre.canvas).unwrap();
        assert!((c.x - 13.5).abs() <= 0.5, "cx = {}", c.x);
        assert!((c.y - 13.5).abs() <= 0.5, "cy = {}", c.y);
    }

    #[test]
    fn test_same_shape_anywhere_gives_same_tensor() {
        let corner = pipeline().preprocess(&surface_with_rect(64, 0, 0, 2, 6));
        let middle = pipeline().preprocess(&surface_with_rect(64, 30, 17, 2, 6));
        let far = pipeline().preprocess(&surface_with_rect(64, 62, 58, 2, 6));

        assert_eq!(corner.tensor, middle.tensor);
        assert_eq!(corner.tensor, far.tensor);
    }

    #[test]
    fn test_drawn_stroke_is_recognized() {
        let mut surface = InkSurface::new(SurfaceConfig::default());
        surface.replay(&[vec![[60.0, 40.0], [180.0, 60.0], [120.0, 210.0]]]);

        let (recognizer, stub) = recognizer_with(StubClassifier::new(stub_scores()));
        let result = recognize(&recognizer, &surface.snapshot()).unwrap();

        assert_eq!(result.prediction.index, 2);
        assert_eq!(result.prediction.label, "၂");
        assert_eq!(result.ranked[0], result.prediction);
        assert_eq!(result.ranked.len(), 10);

        let seen = stub.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].shape(), [1, 1, 28, 28]);
        assert!(seen[0].to_vec().iter().any(|v| *v > 0.0));
    }

    #[test]
    fn test_contract_violation_surfaces_at_warm_up() {
        let mut stub = StubClassifier::new(stub_scores());
        stub.shape = Some(vec![1, 1, 32, 32]);
        let (recognizer, _) = recognizer_with(stub);

        assert!(matches!(
            recognizer.warm_up(),
            Err(RecognizeError::ContractViolation { what: "input shape", .. })
        ));
        // Cached: later requests report the same failure
        let frame = InkSurface::new(SurfaceConfig::default()).snapshot();
        assert!(recognize(&recognizer, &frame).unwrap_err().is_fatal());
    }

    #[test]
    fn test_label_count_mismatch() {
        let (recognizer, _) = recognizer_with(StubClassifier::new(vec![0.0; 26]));
        assert!(matches!(
            recognizer.warm_up(),
            Err(RecognizeError::ContractViolation { what: "class count", .. })
        ));
    }

    #[test]
    fn test_recenter_can_be_disabled() {
        let mut config = ModelProfile::mon_digit_cnn_v1().preprocess;
        config.recenter = false;
        let pre = InkPipeline::new(config)
            .unwrap()
            .preprocess(&surface_with_rect(32, 0, 0, 4, 4));
        assert_eq!(pre.shift, (0, 0));
        assert!(pre.centroid.is_none());
    }

    #[test]
    fn test_invalid_pipeline_config() {
        let mut config = ModelProfile::mon_digit_cnn_v1().preprocess;
        config.target_ink_size = config.canvas_size;
        assert!(matches!(
            InkPipeline::new(config),
            Err(RecognizeError::InvalidConfig(_))
        ));
    }
}
