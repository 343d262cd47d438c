//! Pipeline construction and request/response mapping shared between CLI and
//! server modes.

use crate::config::PipelineConfig;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::RgbImage;
#[cfg(feature = "cuda")]
use label_ocr::core::OrtExecutionProvider;
use label_ocr::core::{OrtSessionConfig, ParallelPolicy};
use label_ocr::detection::DetectorConfig;
use label_ocr::labelocr::{LabelOCR, LabelOCRBuilder, PipelineResult};
use label_ocr::recognition::{FastTierConfig, PipeTierConfig, StreamTierConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Failed to load image: {0}")]
    ImageLoad(String),

    #[error("Failed to download image: {0}")]
    Download(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Request to recognize a label image.
#[derive(Debug, Deserialize)]
pub struct OcrRequest {
    /// Base64-encoded image bytes, with or without a data-URL prefix.
    pub image: String,
}

/// A single recognized region in the response.
#[derive(Debug, Serialize)]
pub struct RegionResponse {
    pub text: String,
    pub confidence: f32,
    /// Corner coordinates ordered top-left, top-right, bottom-right,
    /// bottom-left.
    pub points: [[f32; 2]; 4],
}

/// Response from label recognition.
#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub success: bool,
    pub text: String,
    pub confidence: f32,
    pub regions: Vec<RegionResponse>,
    pub image_width: u32,
    pub image_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,
}

impl OcrResponse {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            text: String::new(),
            confidence: 0.0,
            regions: Vec::new(),
            image_width: 0,
            image_height: 0,
            error: Some(message),
            processing_time_ms: None,
        }
    }
}

/// Pipeline wrapper shared between CLI and server modes.
pub struct OcrEngine {
    ocr: LabelOCR,
}

impl OcrEngine {
    /// Builds the pipeline from the CLI/server configuration.
    ///
    /// Explicitly configured asset paths must exist; a typo'd path is an
    /// operator error, not something to degrade around.
    pub fn new(config: &PipelineConfig) -> Result<Self, OcrError> {
        if !config.det_model.exists() {
            return Err(OcrError::Config(format!(
                "Detection model not found: {}",
                config.det_model.display()
            )));
        }

        let session = parse_device_config(&config.device)?;

        let mut detection = DetectorConfig::new(&config.det_model);
        if let Some(ref session) = session {
            detection = detection.with_session(session.clone());
        }

        let mut builder = LabelOCRBuilder::new()
            .detection(detection)
            .confidence_threshold(config.confidence_threshold);

        if let (Some(rec_model), Some(dict_path)) = (&config.rec_model, &config.dict_path) {
            if !rec_model.exists() {
                return Err(OcrError::Config(format!(
                    "Recognition model not found: {}",
                    rec_model.display()
                )));
            }
            if !dict_path.exists() {
                return Err(OcrError::Config(format!(
                    "Dictionary file not found: {}",
                    dict_path.display()
                )));
            }
            let mut fast = FastTierConfig::new(rec_model, dict_path);
            if let Some(ref session) = session {
                fast = fast.with_session(session.clone());
            }
            builder = builder.local_tier(fast);
        }

        if let Some(ref command) = config.pipe_command {
            builder = builder
                .pipe_tier(PipeTierConfig::new(command).with_args(config.pipe_args.clone()));
        }

        if let Some(ref url) = config.stream_url {
            builder = builder.stream_tier(StreamTierConfig::new(url));
        }

        let policy = ParallelPolicy::new().with_max_threads(config.workers);
        policy
            .install_global_thread_pool()
            .map_err(|e| OcrError::Config(format!("Failed to size the worker pool: {}", e)))?;
        builder = builder.parallel_policy(policy);

        let ocr = builder
            .build()
            .map_err(|e| OcrError::Config(e.to_string()))?;

        Ok(Self { ocr })
    }

    /// Runs the pipeline over one image.
    pub fn process(&self, image: &RgbImage) -> PipelineResult {
        self.ocr.recognize(image)
    }

    /// Number of registered recognition tiers.
    pub fn tier_count(&self) -> usize {
        self.ocr.tier_count()
    }

    /// Converts a pipeline result to the API response.
    pub fn result_to_response(result: &PipelineResult, width: u32, height: u32) -> OcrResponse {
        let regions = result
            .regions
            .iter()
            .map(|region| RegionResponse {
                text: region.text.clone(),
                confidence: region.confidence,
                points: region.quad.points.map(|p| [p.x, p.y]),
            })
            .collect();

        OcrResponse {
            success: true,
            text: result.text.clone(),
            confidence: result.confidence,
            regions,
            image_width: width,
            image_height: height,
            error: None,
            processing_time_ms: Some(result.elapsed.as_secs_f64() * 1000.0),
        }
    }
}

/// Thread-safe engine wrapped in Arc.
pub type SharedOcrEngine = Arc<OcrEngine>;

/// Download bytes from a URL.
pub async fn download_bytes(url: &str) -> Result<Vec<u8>, OcrError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| OcrError::Download(format!("Failed to fetch URL: {}", e)))?;

    if !response.status().is_success() {
        return Err(OcrError::Download(format!(
            "HTTP error: {}",
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| OcrError::Download(format!("Failed to read response body: {}", e)))?;

    Ok(bytes.to_vec())
}

/// Download an image from a URL.
pub async fn download_image(url: &str) -> Result<RgbImage, OcrError> {
    let bytes = download_bytes(url).await?;
    load_image_from_bytes(&bytes)
}

/// Load an image from bytes.
pub fn load_image_from_bytes(bytes: &[u8]) -> Result<RgbImage, OcrError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| OcrError::ImageLoad(format!("Failed to decode image: {}", e)))?;

    Ok(img.to_rgb8())
}

/// Load an image from a file path.
pub fn load_image_from_path(path: &std::path::Path) -> Result<RgbImage, OcrError> {
    let img = image::open(path)
        .map_err(|e| OcrError::ImageLoad(format!("Failed to load image: {}", e)))?;

    Ok(img.to_rgb8())
}

/// Decodes a base64 image payload, tolerating a data-URL prefix.
pub fn decode_image_payload(payload: &str) -> Result<RgbImage, OcrError> {
    let encoded = match payload.find("base64,") {
        Some(index) => &payload[index + "base64,".len()..],
        None => payload,
    };
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| OcrError::ImageLoad(format!("Invalid base64 payload: {}", e)))?;
    load_image_from_bytes(&bytes)
}

/// Parse device string and create an OrtSessionConfig.
fn parse_device_config(device: &str) -> Result<Option<OrtSessionConfig>, OcrError> {
    let device_lower = device.to_lowercase();

    if device_lower == "cpu" {
        return Ok(None);
    }

    #[cfg(feature = "cuda")]
    {
        if device_lower.starts_with("cuda") {
            let device_id = if device_lower == "cuda" {
                0
            } else if let Some(id_str) = device_lower.strip_prefix("cuda:") {
                id_str
                    .parse::<i32>()
                    .map_err(|_| OcrError::Config(format!("Invalid CUDA device ID: {}", device)))?
            } else {
                return Err(OcrError::Config(format!(
                    "Invalid device format: {}. Expected 'cuda' or 'cuda:N'",
                    device
                )));
            };

            let config = OrtSessionConfig::new().with_execution_providers(vec![
                OrtExecutionProvider::CUDA {
                    device_id: Some(device_id),
                },
                OrtExecutionProvider::CPU,
            ]);

            return Ok(Some(config));
        }
    }

    #[cfg(not(feature = "cuda"))]
    {
        if device_lower.starts_with("cuda") {
            return Err(OcrError::Config(format!(
                "CUDA device '{}' requested but CUDA feature is not enabled",
                device
            )));
        }
    }

    Err(OcrError::Config(format!("Unsupported device: {}", device)))
}
