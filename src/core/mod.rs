//! Core infrastructure: errors, shared configuration, and ONNX session plumbing.

pub mod config;
pub mod errors;
pub mod ort_session;

pub use config::ParallelPolicy;
pub use errors::{OCRError, OcrResult, ProcessingStage};
pub use ort_session::{build_session, OrtExecutionProvider, OrtOptimizationLevel, OrtSessionConfig};
