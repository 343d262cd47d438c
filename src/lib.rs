//! # Label OCR
//!
//! A Rust library that reads production-date labels (`生产日期 2024/05/01 CH
//! 合格`) from photographs using a staged pipeline of ONNX models and
//! escalating recognition tiers.
//!
//! ## Pipeline stages
//!
//! - **Region detection**: a DB-style ONNX text detector proposes
//!   quadrilateral label regions.
//! - **Geometry normalization**: each region is corner-ordered and
//!   perspective-unwarped into a flat crop.
//! - **Tiered recognition**: crops go to a local CRNN ONNX model first, then
//!   to a persistent subprocess OCR bridge, then to a remote WebSocket vision
//!   model, escalating until a candidate clears the confidence threshold.
//! - **Result assembly**: region texts are ordered semantically (label token,
//!   date, station code, status keyword) with spatial reading order as the
//!   tiebreak, joined into one reading with a pessimistic aggregate
//!   confidence.
//!
//! Every stage degrades gracefully: a tier whose engine cannot be built is
//! skipped for the process lifetime, a region with broken geometry is
//! dropped, and `recognize` always returns a well-formed result.
//!
//! ## Modules
//!
//! * [`core`] - Error handling, ONNX session tuning, and the parallelism policy
//! * [`detection`] - Region detector trait and the ONNX DB detector
//! * [`recognition`] - Recognizer trait, the three tiers, and the escalation controller
//! * [`labelocr`] - Pipeline builder, orchestrator, and result types
//! * [`processors`] - Geometry primitives, normalization, DB postprocess
//! * [`utils`] - Perspective unwarp and tracing setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use label_ocr::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ocr = LabelOCRBuilder::new()
//!     .detection(DetectorConfig::new("models/det.onnx"))
//!     .local_tier(FastTierConfig::new("models/rec.onnx", "models/dict.txt"))
//!     .pipe_tier(PipeTierConfig::new("paddleocr-json"))
//!     .build()?;
//!
//! let image = image::open("label.jpg")?.to_rgb8();
//! let result = ocr.recognize(&image);
//! println!("{} ({:.2})", result.text, result.confidence);
//! for region in &result.regions {
//!     println!("  {:?}: {}", region.quad.points[0], region.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod detection;
pub mod labelocr;
pub mod processors;
pub mod recognition;
pub mod utils;

/// Prelude module for convenient imports.
///
/// Bring the essentials into scope with a single use statement:
///
/// ```rust
/// use label_ocr::prelude::*;
/// ```
///
/// Included items focus on the most common tasks:
/// - Pipeline construction (`LabelOCR`, `LabelOCRBuilder`, tier configs)
/// - Results (`PipelineResult`, `TextRegion`, `RecognitionCandidate`)
/// - Essential error and result types (`OCRError`, `OcrResult`)
///
/// For advanced customization (custom detectors or tiers, session tuning),
/// import directly from the respective modules (e.g., `label_ocr::detection`,
/// `label_ocr::recognition`, `label_ocr::core`).
pub mod prelude {
    pub use crate::core::{OCRError, OcrResult, ParallelPolicy};
    pub use crate::detection::DetectorConfig;
    pub use crate::labelocr::{LabelOCR, LabelOCRBuilder, PipelineResult, TextRegion};
    pub use crate::recognition::{
        FastTierConfig, PipeTierConfig, RecognitionCandidate, StreamTierConfig,
    };
}
