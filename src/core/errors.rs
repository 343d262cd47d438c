//! Error types for the label OCR pipeline.
//!
//! One crate-wide error enum covers every stage from image load to transport.
//! Callers inside the pipeline treat all of these as recoverable: a failed
//! stage degrades the result for one region instead of aborting the call.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type OcrResult<T> = Result<T, OCRError>;

/// Pipeline stage where a processing error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Region detection (ONNX forward pass or postprocess).
    Detection,
    /// Corner ordering and perspective unwarping.
    Geometry,
    /// Image normalization / tensor layout.
    Normalization,
    /// Probability-map postprocessing.
    PostProcessing,
    /// Text recognition (any tier).
    Recognition,
    /// Crop encoding for a transport tier.
    Encoding,
    /// Pipe or socket transport.
    Transport,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Detection => write!(f, "detection"),
            ProcessingStage::Geometry => write!(f, "geometry"),
            ProcessingStage::Normalization => write!(f, "normalization"),
            ProcessingStage::PostProcessing => write!(f, "post-processing"),
            ProcessingStage::Recognition => write!(f, "recognition"),
            ProcessingStage::Encoding => write!(f, "encoding"),
            ProcessingStage::Transport => write!(f, "transport"),
        }
    }
}

/// Errors raised by the label OCR pipeline.
#[derive(Error, Debug)]
pub enum OCRError {
    /// Error occurred while decoding or loading an image.
    #[error("image load")]
    ImageLoad(#[source] image::ImageError),

    /// Error occurred in a processing stage.
    #[error("{kind} failed: {context}")]
    Processing {
        /// The stage where the error occurred.
        kind: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error occurred during model inference.
    #[error("inference failed in model '{model_name}': {context}")]
    Inference {
        /// The model where inference failed.
        model_name: String,
        /// Additional context about the inference error.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A recognizer transport spoke a malformed or unexpected protocol.
    #[error("{backend} protocol: {message}")]
    Protocol {
        /// The backend that produced the error.
        backend: &'static str,
        /// What was malformed or unexpected.
        message: String,
    },

    /// A bounded exchange with a recognizer transport ran out of time.
    #[error("{backend} timed out after {elapsed_ms} ms")]
    Timeout {
        /// The backend that timed out.
        backend: &'static str,
        /// How long the exchange waited.
        elapsed_ms: u64,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error indicating a configuration problem.
    #[error("configuration: {message}")]
    ConfigError {
        /// A message describing the configuration error.
        message: String,
    },

    /// Error loading a model or dictionary file.
    #[error("model load failed for '{model_path}': {reason}")]
    ModelLoad {
        /// Path to the file that failed to load.
        model_path: String,
        /// Short reason string.
        reason: String,
        /// Underlying source error, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error from the ONNX Runtime session.
    #[error(transparent)]
    Session(#[from] ort::Error),

    /// Error from tensor shape operations.
    #[error("tensor operation")]
    Tensor(#[from] ndarray::ShapeError),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for OCRError {
    fn from(error: image::ImageError) -> Self {
        Self::ImageLoad(error)
    }
}

impl OCRError {
    /// Wraps an error from a processing stage with context.
    pub fn processing(
        kind: ProcessingStage,
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            kind,
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Wraps an error raised while running a named model.
    pub fn inference(
        model_name: impl Into<String>,
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Inference {
            model_name: model_name.into(),
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Creates a protocol error for a recognizer transport.
    pub fn protocol(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            backend,
            message: message.into(),
        }
    }

    /// Creates a timeout error for a recognizer transport.
    pub fn timeout(backend: &'static str, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            backend,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Creates an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Creates a model-load error with an optional source.
    pub fn model_load(
        model_path: impl Into<String>,
        reason: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ModelLoad {
            model_path: model_path.into(),
            reason: reason.into(),
            source,
        }
    }
}
