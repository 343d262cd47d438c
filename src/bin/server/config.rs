//! Configuration types for the label OCR server and CLI.

use std::path::PathBuf;

/// Configuration for the recognition pipeline.
///
/// A tier is enabled by the presence of its configuration: the local tier by
/// `rec_model` + `dict_path`, the subprocess tier by `pipe_command`, the
/// streaming tier by `stream_url`.
#[derive(Clone)]
pub struct PipelineConfig {
    pub det_model: PathBuf,
    pub rec_model: Option<PathBuf>,
    pub dict_path: Option<PathBuf>,
    pub pipe_command: Option<String>,
    pub pipe_args: Vec<String>,
    pub stream_url: Option<String>,
    pub confidence_threshold: f32,
    pub device: String,
    pub workers: Option<usize>,
}

/// Configuration for the HTTP server.
#[derive(Clone)]
pub struct ServerConfig {
    pub pipeline: PipelineConfig,
    pub host: String,
    pub port: u16,
}
