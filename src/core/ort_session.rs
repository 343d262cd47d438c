//! ONNX Runtime session configuration and construction.
//!
//! Both engines in this crate (the DB text detector and the local recognition
//! tier) build their sessions through [`build_session`], so threading,
//! optimization level, and execution-provider selection are configured in one
//! place.

use std::path::Path;

use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use serde::{Deserialize, Serialize};

use crate::core::errors::{OCRError, OcrResult};

/// Graph optimization levels for ONNX Runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub enum OrtOptimizationLevel {
    /// Disable all optimizations.
    DisableAll,
    /// Enable basic optimizations.
    Level1,
    /// Enable extended optimizations.
    Level2,
    /// Enable all optimizations.
    #[default]
    Level3,
}

/// Execution providers supported by this crate, in order of preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum OrtExecutionProvider {
    /// CPU execution provider (always available).
    #[default]
    CPU,
    /// NVIDIA CUDA execution provider (requires the `cuda` feature).
    CUDA {
        /// CUDA device ID (default: 0).
        device_id: Option<i32>,
    },
}

/// Configuration applied to every ONNX Runtime session this crate creates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrtSessionConfig {
    /// Number of threads used to parallelize execution within nodes.
    pub intra_threads: Option<usize>,
    /// Number of threads used to parallelize execution across nodes.
    pub inter_threads: Option<usize>,
    /// Graph optimization level.
    pub optimization_level: Option<OrtOptimizationLevel>,
    /// Execution providers in order of preference.
    pub execution_providers: Option<Vec<OrtExecutionProvider>>,
}

impl OrtSessionConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of intra-op threads.
    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = Some(threads);
        self
    }

    /// Sets the number of inter-op threads.
    pub fn with_inter_threads(mut self, threads: usize) -> Self {
        self.inter_threads = Some(threads);
        self
    }

    /// Sets the graph optimization level.
    pub fn with_optimization_level(mut self, level: OrtOptimizationLevel) -> Self {
        self.optimization_level = Some(level);
        self
    }

    /// Sets the execution providers.
    pub fn with_execution_providers(mut self, providers: Vec<OrtExecutionProvider>) -> Self {
        self.execution_providers = Some(providers);
        self
    }
}

/// Applies a session configuration to an ONNX Runtime session builder.
pub fn apply_session_config(
    mut builder: SessionBuilder,
    cfg: &OrtSessionConfig,
) -> Result<SessionBuilder, ort::Error> {
    if let Some(intra) = cfg.intra_threads {
        builder = builder.with_intra_threads(intra)?;
    }
    if let Some(inter) = cfg.inter_threads {
        builder = builder.with_inter_threads(inter)?;
    }
    let level = match cfg.optimization_level.unwrap_or_default() {
        OrtOptimizationLevel::DisableAll => GraphOptimizationLevel::Disable,
        OrtOptimizationLevel::Level1 => GraphOptimizationLevel::Level1,
        OrtOptimizationLevel::Level2 => GraphOptimizationLevel::Level2,
        OrtOptimizationLevel::Level3 => GraphOptimizationLevel::Level3,
    };
    builder = builder.with_optimization_level(level)?;

    let eps = cfg
        .execution_providers
        .clone()
        .unwrap_or_else(|| vec![OrtExecutionProvider::CPU]);
    let providers = build_execution_providers(&eps)?;
    if !providers.is_empty() {
        builder = builder.with_execution_providers(providers)?;
    }
    Ok(builder)
}

fn build_execution_providers(
    eps: &[OrtExecutionProvider],
) -> Result<Vec<ExecutionProviderDispatch>, ort::Error> {
    let mut providers = Vec::new();
    for ep in eps {
        match ep {
            OrtExecutionProvider::CPU => {
                providers.push(CPUExecutionProvider::default().build());
            }
            #[cfg(feature = "cuda")]
            OrtExecutionProvider::CUDA { device_id } => {
                let mut cuda = ort::execution_providers::CUDAExecutionProvider::default();
                if let Some(id) = device_id {
                    cuda = cuda.with_device_id(*id);
                }
                providers.push(cuda.build());
            }
            #[cfg(not(feature = "cuda"))]
            OrtExecutionProvider::CUDA { .. } => {
                return Err(ort::Error::new(
                    "CUDA execution provider requested but cuda feature is not enabled",
                ));
            }
        }
    }
    Ok(providers)
}

/// Builds an ONNX Runtime session from a model file.
///
/// Fails with [`OCRError::ModelLoad`] when the file is missing, before any
/// runtime state is touched.
pub fn build_session(model_path: &Path, cfg: &OrtSessionConfig) -> OcrResult<Session> {
    if !model_path.is_file() {
        return Err(OCRError::model_load(
            model_path.display().to_string(),
            "file not found",
            None,
        ));
    }
    let builder = Session::builder()?;
    let builder = apply_session_config(builder, cfg)?;
    let session = builder.commit_from_file(model_path)?;
    Ok(session)
}
