//! Tiered text recognition.
//!
//! Three backends read text from a cropped region, ordered from cheapest to
//! most capable:
//!
//! - [`FastTier`]: a local CRNN model through ONNX Runtime.
//! - [`PipeTier`]: a persistent OCR subprocess speaking JSON over stdio.
//! - [`StreamTier`]: a remote vision model reached over WebSocket.
//!
//! [`TieredRecognizer`] runs them in order and stops at the first reading
//! that clears its confidence threshold.

mod fast;
mod pipe;
mod stream;
mod tiered;

pub use fast::{FastTier, FastTierConfig};
pub use pipe::{PipeTier, PipeTierConfig};
pub use stream::{StreamTier, StreamTierConfig};
pub use tiered::{TieredRecognizer, TieredRecognizerBuilder};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::core::OcrResult;

/// One backend's reading of a crop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognitionCandidate {
    /// Recognized text, possibly empty.
    pub text: String,
    /// Confidence in [0.0, 1.0]. Zero when the backend saw nothing.
    pub confidence: f32,
}

impl RecognitionCandidate {
    /// Creates a candidate from a text and confidence pair.
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    /// True when no usable text was produced.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A single recognition backend.
///
/// Backends are shared across worker threads, so `recognize` takes `&self`
/// and implementations guard their own mutable state.
pub trait RecognizerBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this backend can currently serve calls.
    ///
    /// A backend whose engine failed to construct reports `false` for the
    /// rest of the process lifetime and is skipped without being counted as
    /// a failed attempt.
    fn is_ready(&self) -> bool {
        true
    }

    /// Reads text from one cropped region.
    fn recognize(&self, crop: &RgbImage) -> OcrResult<RecognitionCandidate>;
}
