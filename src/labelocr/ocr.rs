//! High-level label pipeline builder and orchestrator.
//!
//! [`LabelOCRBuilder`] wires a region detector and up to three recognition
//! tiers into a [`LabelOCR`] instance whose `recognize` call runs the full
//! detect → unwarp → recognize → assemble flow.

use std::path::Path;
use std::time::Instant;

use image::RgbImage;
use rayon::prelude::*;

use crate::core::{OCRError, OcrResult, ParallelPolicy};
use crate::detection::{DetectorConfig, OnnxDetector, RegionDetector};
use crate::labelocr::assemble::assemble;
use crate::labelocr::result::{PipelineResult, TextRegion};
use crate::processors::Quadrilateral;
use crate::recognition::{
    FastTier, FastTierConfig, PipeTier, PipeTierConfig, RecognizerBackend, StreamTier,
    StreamTierConfig, TieredRecognizer,
};
use crate::utils::transform::unwarp_quad;

fn warn_if_missing(path: &Path, what: &str) {
    if !path.exists() {
        tracing::warn!(
            "Configured {} '{}' not found, the component will be unavailable",
            what,
            path.display()
        );
    }
}

/// Builder for the label recognition pipeline.
///
/// A detector and at least one recognition tier are required; everything else
/// has defaults. Tiers escalate in registration order: local ONNX, then the
/// subprocess bridge, then the WebSocket backstop, then any custom backends.
///
/// # Example
///
/// ```no_run
/// use label_ocr::detection::DetectorConfig;
/// use label_ocr::labelocr::LabelOCRBuilder;
/// use label_ocr::recognition::FastTierConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ocr = LabelOCRBuilder::new()
///     .detection(DetectorConfig::new("models/det.onnx"))
///     .local_tier(FastTierConfig::new("models/rec.onnx", "models/dict.txt"))
///     .build()?;
///
/// let image = image::open("label.jpg")?.to_rgb8();
/// let result = ocr.recognize(&image);
/// println!("{} ({:.2})", result.text, result.confidence);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct LabelOCRBuilder {
    detection: Option<DetectorConfig>,
    custom_detector: Option<Box<dyn RegionDetector>>,
    local: Option<FastTierConfig>,
    pipe: Option<PipeTierConfig>,
    stream: Option<StreamTierConfig>,
    extra_tiers: Vec<Box<dyn RecognizerBackend>>,
    confidence_threshold: Option<f32>,
    parallel_policy: ParallelPolicy,
}

impl LabelOCRBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the ONNX region detector.
    pub fn detection(mut self, config: DetectorConfig) -> Self {
        self.detection = Some(config);
        self
    }

    /// Installs a custom detector implementation, overriding `detection`.
    pub fn detector(mut self, detector: impl RegionDetector + 'static) -> Self {
        self.custom_detector = Some(Box::new(detector));
        self
    }

    /// Enables the local ONNX recognition tier.
    pub fn local_tier(mut self, config: FastTierConfig) -> Self {
        self.local = Some(config);
        self
    }

    /// Enables the subprocess recognition tier.
    pub fn pipe_tier(mut self, config: PipeTierConfig) -> Self {
        self.pipe = Some(config);
        self
    }

    /// Enables the WebSocket recognition tier.
    pub fn stream_tier(mut self, config: StreamTierConfig) -> Self {
        self.stream = Some(config);
        self
    }

    /// Appends a custom recognition backend after the built-in tiers.
    pub fn tier(mut self, backend: impl RecognizerBackend + 'static) -> Self {
        self.extra_tiers.push(Box::new(backend));
        self
    }

    /// Sets the confidence below which recognition escalates to the next
    /// tier. Must lie in `(0, 1]`.
    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    /// Sets the region-level parallelism policy.
    pub fn parallel_policy(mut self, policy: ParallelPolicy) -> Self {
        self.parallel_policy = policy;
        self
    }

    /// Validates the configuration and builds the pipeline.
    ///
    /// Configured asset paths are only warned about when missing: a tier
    /// whose assets are absent disables itself on first use instead of
    /// failing the build.
    pub fn build(self) -> OcrResult<LabelOCR> {
        if let Some(threshold) = self.confidence_threshold {
            if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
                return Err(OCRError::config(format!(
                    "confidence threshold {} outside (0, 1]",
                    threshold
                )));
            }
        }

        let detector: Box<dyn RegionDetector> = match (self.custom_detector, self.detection) {
            (Some(custom), _) => custom,
            (None, Some(config)) => {
                warn_if_missing(&config.model_path, "detection model");
                Box::new(OnnxDetector::new(config))
            }
            (None, None) => return Err(OCRError::config("a region detector is required")),
        };

        let mut tiers = TieredRecognizer::builder();
        if let Some(threshold) = self.confidence_threshold {
            tiers = tiers.confidence_threshold(threshold);
        }

        let mut enabled = self.extra_tiers.len();
        if let Some(config) = self.local {
            warn_if_missing(&config.model_path, "recognition model");
            warn_if_missing(&config.dict_path, "character dictionary");
            tiers = tiers.backend(FastTier::new(config));
            enabled += 1;
        }
        if let Some(config) = self.pipe {
            tiers = tiers.backend(PipeTier::new(config));
            enabled += 1;
        }
        if let Some(config) = self.stream {
            tiers = tiers.backend(StreamTier::new(config));
            enabled += 1;
        }
        for backend in self.extra_tiers {
            tiers = tiers.boxed_backend(backend);
        }

        if enabled == 0 {
            return Err(OCRError::config(
                "at least one recognition tier must be enabled",
            ));
        }

        let recognizer = tiers.build();
        tracing::info!(
            "Label pipeline ready with {} recognition tier(s)",
            recognizer.backend_count()
        );

        Ok(LabelOCR {
            detector,
            recognizer,
            parallel_policy: self.parallel_policy,
        })
    }
}

/// The label recognition pipeline.
pub struct LabelOCR {
    detector: Box<dyn RegionDetector>,
    recognizer: TieredRecognizer,
    parallel_policy: ParallelPolicy,
}

impl std::fmt::Debug for LabelOCR {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelOCR")
            .field("tier_count", &self.recognizer.backend_count())
            .field("parallel_policy", &self.parallel_policy)
            .finish_non_exhaustive()
    }
}

impl LabelOCR {
    /// Starts building a pipeline.
    pub fn builder() -> LabelOCRBuilder {
        LabelOCRBuilder::new()
    }

    /// Number of registered recognition tiers.
    pub fn tier_count(&self) -> usize {
        self.recognizer.backend_count()
    }

    /// Runs the full pipeline over one image.
    ///
    /// Never returns an error and never panics: a failing detector yields an
    /// empty result, a region with degenerate geometry is skipped, and a
    /// region whose recognition fails everywhere contributes nothing while
    /// its siblings continue.
    pub fn recognize(&self, image: &RgbImage) -> PipelineResult {
        let started = Instant::now();

        let quads = match self.detector.detect(image) {
            Ok(quads) => quads,
            Err(err) => {
                tracing::warn!("Region detection failed: {}", err);
                Vec::new()
            }
        };
        if quads.is_empty() {
            tracing::debug!("No label regions detected");
            return PipelineResult::empty(started.elapsed());
        }
        tracing::debug!("Detected {} candidate region(s)", quads.len());

        let recognize_region = |quad: &Quadrilateral| -> Option<TextRegion> {
            let crop = unwarp_quad(image, quad);
            if crop.width() == 0 || crop.height() == 0 {
                tracing::debug!("Skipping region with degenerate geometry");
                return None;
            }
            let candidate = self.recognizer.recognize(&crop);
            Some(TextRegion::new(*quad, candidate.text, candidate.confidence))
        };

        let regions: Vec<TextRegion> = if self.parallel_policy.should_parallelize(quads.len()) {
            quads.par_iter().filter_map(recognize_region).collect()
        } else {
            quads.iter().filter_map(recognize_region).collect()
        };

        let (text, confidence, ordered) = assemble(regions);
        let elapsed = started.elapsed();
        tracing::debug!(
            "Pipeline assembled {} region(s) in {} ms",
            ordered.len(),
            elapsed.as_millis()
        );

        PipelineResult {
            text,
            confidence,
            regions: ordered,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::RecognitionCandidate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubDetector {
        quads: Vec<Quadrilateral>,
        calls: Arc<AtomicUsize>,
    }

    impl StubDetector {
        fn new(quads: Vec<Quadrilateral>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let detector = Self {
                quads,
                calls: Arc::clone(&calls),
            };
            (detector, calls)
        }
    }

    impl RegionDetector for StubDetector {
        fn detect(&self, _image: &RgbImage) -> OcrResult<Vec<Quadrilateral>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.quads.clone())
        }
    }

    struct FailingDetector;

    impl RegionDetector for FailingDetector {
        fn detect(&self, _image: &RgbImage) -> OcrResult<Vec<Quadrilateral>> {
            Err(OCRError::invalid_input("detector rejected the frame"))
        }
    }

    /// Maps the crop width back to a known label field so tests can tell
    /// regions apart after unwarping.
    struct WidthBackend {
        calls: Arc<AtomicUsize>,
    }

    impl WidthBackend {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let backend = Self {
                calls: Arc::clone(&calls),
            };
            (backend, calls)
        }
    }

    impl RecognizerBackend for WidthBackend {
        fn name(&self) -> &'static str {
            "width-stub"
        }

        fn recognize(&self, crop: &RgbImage) -> OcrResult<RecognitionCandidate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let candidate = match crop.width() {
                40 => RecognitionCandidate::new("CH", 0.90),
                60 => RecognitionCandidate::new("2024/05/01", 0.80),
                80 => RecognitionCandidate::new("生产日期", 0.96),
                _ => RecognitionCandidate::default(),
            };
            Ok(candidate)
        }
    }

    fn label_quads() -> Vec<Quadrilateral> {
        vec![
            Quadrilateral::from_rect(0.0, 0.0, 40.0, 10.0),
            Quadrilateral::from_rect(0.0, 20.0, 60.0, 30.0),
            Quadrilateral::from_rect(0.0, 40.0, 80.0, 50.0),
        ]
    }

    fn frame() -> RgbImage {
        RgbImage::new(200, 200)
    }

    #[test]
    fn test_empty_detection_is_terminal() {
        let (detector, detector_calls) = StubDetector::new(Vec::new());
        let (backend, backend_calls) = WidthBackend::new();
        let ocr = LabelOCR::builder()
            .detector(detector)
            .tier(backend)
            .build()
            .unwrap();

        let result = ocr.recognize(&frame());
        assert!(result.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(detector_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_full_flow_assembles_reading_order() {
        let (detector, _) = StubDetector::new(label_quads());
        let (backend, backend_calls) = WidthBackend::new();
        let ocr = LabelOCR::builder()
            .detector(detector)
            .tier(backend)
            .build()
            .unwrap();

        let result = ocr.recognize(&frame());
        assert_eq!(result.text, "生产日期 2024/05/01 CH");
        assert!((result.confidence - 0.80).abs() < 1e-6);
        assert_eq!(result.regions.len(), 3);
        assert_eq!(result.regions[0].text, "生产日期");
        assert_eq!(backend_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_degenerate_region_does_not_abort_siblings() {
        let corner = crate::processors::Point::new(5.0, 5.0);
        let (detector, _) = StubDetector::new(vec![
            Quadrilateral::new([corner, corner, corner, corner]),
            Quadrilateral::from_rect(0.0, 0.0, 40.0, 10.0),
        ]);
        let (backend, backend_calls) = WidthBackend::new();
        let ocr = LabelOCR::builder()
            .detector(detector)
            .tier(backend)
            .build()
            .unwrap();

        let result = ocr.recognize(&frame());
        assert_eq!(result.text, "CH");
        assert_eq!(result.regions.len(), 1);
        assert_eq!(backend_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detector_error_degrades_to_empty_result() {
        let (backend, backend_calls) = WidthBackend::new();
        let ocr = LabelOCR::builder()
            .detector(FailingDetector)
            .tier(backend)
            .build()
            .unwrap();

        let result = ocr.recognize(&frame());
        assert!(result.is_empty());
        assert_eq!(backend_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parallel_and_serial_paths_agree() {
        let run = |policy: ParallelPolicy| {
            let (detector, _) = StubDetector::new(label_quads());
            let (backend, _) = WidthBackend::new();
            let ocr = LabelOCR::builder()
                .detector(detector)
                .tier(backend)
                .parallel_policy(policy)
                .build()
                .unwrap();
            ocr.recognize(&frame())
        };

        let serial = run(ParallelPolicy::new().with_region_threshold(usize::MAX));
        let parallel = run(ParallelPolicy::new().with_region_threshold(1));
        assert_eq!(serial.text, parallel.text);
        assert_eq!(serial.confidence, parallel.confidence);
        assert_eq!(serial.regions.len(), parallel.regions.len());
    }

    #[test]
    fn test_builder_requires_a_detector() {
        let (backend, _) = WidthBackend::new();
        let err = LabelOCR::builder().tier(backend).build().unwrap_err();
        assert!(matches!(err, OCRError::ConfigError { .. }));
    }

    #[test]
    fn test_builder_requires_a_tier() {
        let err = LabelOCR::builder()
            .detection(DetectorConfig::new("det.onnx"))
            .build()
            .unwrap_err();
        assert!(matches!(err, OCRError::ConfigError { .. }));
    }

    #[test]
    fn test_builder_rejects_bad_threshold() {
        for threshold in [0.0, -0.5, 1.5, f32::NAN] {
            let (backend, _) = WidthBackend::new();
            let err = LabelOCR::builder()
                .detector(FailingDetector)
                .tier(backend)
                .confidence_threshold(threshold)
                .build()
                .unwrap_err();
            assert!(matches!(err, OCRError::ConfigError { .. }), "{threshold}");
        }
    }

    #[test]
    fn test_builder_accepts_full_configuration() {
        let ocr = LabelOCR::builder()
            .detection(DetectorConfig::new("det.onnx"))
            .local_tier(FastTierConfig::new("rec.onnx", "dict.txt"))
            .pipe_tier(PipeTierConfig::new("paddleocr-json"))
            .stream_tier(StreamTierConfig::new("ws://127.0.0.1:9000/ocr"))
            .confidence_threshold(0.9)
            .build()
            .unwrap();
        assert_eq!(ocr.tier_count(), 3);
    }
}
