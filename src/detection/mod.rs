//! Text region detection.
//!
//! The pipeline only needs one capability from this layer: given an image,
//! produce candidate text regions as quadrilaterals. [`OnnxDetector`] is the
//! production implementation; tests substitute their own [`RegionDetector`].

mod onnx;

pub use onnx::{DetectorConfig, OnnxDetector};

use image::RgbImage;

use crate::core::OcrResult;
use crate::processors::Quadrilateral;

/// Finds candidate text regions in an image.
///
/// Implementations are shared across threads by the pipeline, so they take
/// `&self` and must be `Send + Sync`.
pub trait RegionDetector: Send + Sync {
    /// Returns the detected text regions in source-image coordinates.
    ///
    /// An implementation that cannot run (missing model, failed init) should
    /// return an empty list rather than an error; the pipeline treats an
    /// empty detection as a terminal empty result.
    fn detect(&self, image: &RgbImage) -> OcrResult<Vec<Quadrilateral>>;
}
