//! DB text detector backed by an ONNX Runtime session.
//!
//! The session loads lazily on first use. A failed load is recorded once and
//! the detector stays disabled for its lifetime, reporting no regions, so a
//! missing model file degrades the pipeline instead of failing every call.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use image::{imageops, RgbImage};
use ndarray::Array2;
use ort::session::Session;
use ort::value::Value;
use serde::{Deserialize, Serialize};

use crate::core::{build_session, OCRError, OcrResult, OrtSessionConfig};
use crate::detection::RegionDetector;
use crate::processors::{
    DbPostProcess, DbPostProcessConfig, LimitType, NormalizeImage, Quadrilateral,
};

fn default_limit_side_len() -> u32 {
    960
}

/// Configuration for the ONNX DB detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Path to the detection model file.
    pub model_path: PathBuf,
    /// Side length the input is scaled towards before snapping to 32.
    #[serde(default = "default_limit_side_len")]
    pub limit_side_len: u32,
    /// Whether `limit_side_len` bounds the longer or the shorter side.
    #[serde(default)]
    pub limit_type: LimitType,
    /// ONNX Runtime session options.
    #[serde(default)]
    pub session: OrtSessionConfig,
    /// Probability-map postprocessing options.
    #[serde(default)]
    pub postprocess: DbPostProcessConfig,
}

impl DetectorConfig {
    /// Creates a config for the given model path with default tuning.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            limit_side_len: default_limit_side_len(),
            limit_type: LimitType::default(),
            session: OrtSessionConfig::default(),
            postprocess: DbPostProcessConfig::default(),
        }
    }

    /// Sets the resize limit.
    pub fn with_limit_side_len(mut self, limit: u32) -> Self {
        self.limit_side_len = limit;
        self
    }

    /// Sets which side the resize limit applies to.
    pub fn with_limit_type(mut self, limit_type: LimitType) -> Self {
        self.limit_type = limit_type;
        self
    }

    /// Sets the session options.
    pub fn with_session(mut self, session: OrtSessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Sets the postprocessing options.
    pub fn with_postprocess(mut self, postprocess: DbPostProcessConfig) -> Self {
        self.postprocess = postprocess;
        self
    }
}

struct DetectorEngine {
    session: Mutex<Session>,
    input_name: String,
    normalize: NormalizeImage,
    postprocess: DbPostProcess,
}

impl DetectorEngine {
    fn load(config: &DetectorConfig) -> OcrResult<Self> {
        let session = build_session(&config.model_path, &config.session)?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "x".to_string());

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            normalize: NormalizeImage::imagenet_rgb()?,
            postprocess: DbPostProcess::new(config.postprocess.clone()),
        })
    }
}

/// DB text detector with a lazily initialized ONNX session.
pub struct OnnxDetector {
    config: DetectorConfig,
    engine: OnceLock<Option<DetectorEngine>>,
}

impl OnnxDetector {
    /// Creates a detector. The model is not touched until the first call.
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            engine: OnceLock::new(),
        }
    }

    /// Initialization happens at most once; a load failure leaves the
    /// detector permanently disabled.
    fn engine(&self) -> Option<&DetectorEngine> {
        self.engine
            .get_or_init(|| match DetectorEngine::load(&self.config) {
                Ok(engine) => {
                    tracing::info!(
                        "Detection model loaded from {}",
                        self.config.model_path.display()
                    );
                    Some(engine)
                }
                Err(err) => {
                    tracing::warn!(
                        "Detection model failed to load from {}, detector disabled: {}",
                        self.config.model_path.display(),
                        err
                    );
                    None
                }
            })
            .as_ref()
    }

    fn forward(&self, engine: &DetectorEngine, image: &RgbImage) -> OcrResult<Vec<(Quadrilateral, f32)>> {
        let (src_width, src_height) = image.dimensions();
        let resized = resize_to_multiple_of_32(
            image,
            self.config.limit_side_len,
            self.config.limit_type,
        );
        let tensor = engine.normalize.normalize_to(&resized)?;

        let input_value = Value::from_array(tensor)?;
        let prob_map = {
            let mut session = match engine.session.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let outputs = session.run(ort::inputs![engine.input_name.as_str() => input_value])?;
            let output = outputs[0].try_extract_array::<f32>()?;

            let dims = output.shape().to_vec();
            let (map_height, map_width) = match dims.as_slice() {
                [1, 1, h, w] | [1, h, w] => (*h, *w),
                other => {
                    return Err(OCRError::inference(
                        "db-detector",
                        format!("unexpected output shape {:?}", other),
                        std::io::Error::new(std::io::ErrorKind::InvalidData, "bad output rank"),
                    ));
                }
            };
            Array2::from_shape_vec((map_height, map_width), output.iter().copied().collect())?
        };

        Ok(engine
            .postprocess
            .extract_quads(&prob_map.view(), src_width, src_height))
    }
}

impl RegionDetector for OnnxDetector {
    fn detect(&self, image: &RgbImage) -> OcrResult<Vec<Quadrilateral>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let Some(engine) = self.engine() else {
            return Ok(Vec::new());
        };

        let scored = self.forward(engine, image)?;
        tracing::debug!("Detected {} text regions", scored.len());
        Ok(scored.into_iter().map(|(quad, _)| quad).collect())
    }
}

/// Scales the image towards the side limit, then snaps both dimensions to
/// multiples of 32 as the DB model expects.
fn resize_to_multiple_of_32(image: &RgbImage, limit_side_len: u32, limit_type: LimitType) -> RgbImage {
    let (width, height) = image.dimensions();
    let limit = limit_side_len as f32;

    let ratio = match limit_type {
        LimitType::Max => {
            let max_side = width.max(height) as f32;
            if max_side > limit {
                limit / max_side
            } else {
                1.0
            }
        }
        LimitType::Min => {
            let min_side = width.min(height) as f32;
            if min_side < limit {
                limit / min_side
            } else {
                1.0
            }
        }
    };

    let target_width = snap_to_32(width as f32 * ratio);
    let target_height = snap_to_32(height as f32 * ratio);
    if target_width == width && target_height == height {
        return image.clone();
    }

    imageops::resize(
        image,
        target_width,
        target_height,
        imageops::FilterType::Triangle,
    )
}

fn snap_to_32(value: f32) -> u32 {
    let snapped = (value / 32.0).round() as u32;
    snapped.max(1) * 32
}
