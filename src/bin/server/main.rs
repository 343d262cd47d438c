//! Label OCR Server and CLI
//!
//! A cross-platform binary for production-date label recognition via CLI or
//! HTTP server.
//!
//! # Usage
//!
//! ## CLI Mode
//! ```bash
//! label-ocr-server recognize label.jpg --det-model models/det.onnx --rec-model models/rec.onnx --dict-path models/dict.txt
//! label-ocr-server recognize "https://example.com/label.jpg" --det-model models/det.onnx --pipe-command "python pipe_ocr.py"
//! ```
//!
//! ## Server Mode
//! ```bash
//! label-ocr-server serve --det-model models/det.onnx --rec-model models/rec.onnx --dict-path models/dict.txt --port 8080
//! ```

mod cli;
mod config;
mod ocr;
mod server;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "label-ocr-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Production-date label recognition via CLI or HTTP server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Pipeline options shared by both modes.
///
/// A recognition tier is enabled by supplying its configuration: the fast
/// tier needs both a model and a dictionary, the subprocess tier a command,
/// the streaming tier a URL. At least one tier must be enabled.
#[derive(Args)]
struct PipelineArgs {
    /// Path to the label region detection model
    #[arg(long = "det-model", env = "LABEL_OCR_DET_MODEL")]
    det_model: PathBuf,

    /// Path to the local recognition model (enables the fast tier)
    #[arg(long = "rec-model", env = "LABEL_OCR_REC_MODEL", requires = "dict_path")]
    rec_model: Option<PathBuf>,

    /// Path to the character dictionary for the local recognition model
    #[arg(long = "dict-path", env = "LABEL_OCR_DICT_PATH", requires = "rec_model")]
    dict_path: Option<PathBuf>,

    /// Command for the subprocess recognition tier
    #[arg(long = "pipe-command", env = "LABEL_OCR_PIPE_COMMAND")]
    pipe_command: Option<String>,

    /// Argument for the subprocess recognition tier (repeatable)
    #[arg(long = "pipe-arg")]
    pipe_args: Vec<String>,

    /// WebSocket URL for the streaming recognition tier
    #[arg(long = "stream-url", env = "LABEL_OCR_STREAM_URL")]
    stream_url: Option<String>,

    /// Confidence threshold for accepting a tier's result
    #[arg(long, default_value = "0.95", env = "LABEL_OCR_THRESHOLD")]
    threshold: f32,

    /// Device to use (cpu, cuda, cuda:0, etc.)
    #[arg(long, default_value = "cpu", env = "LABEL_OCR_DEVICE")]
    device: String,

    /// Number of worker threads for region-level parallelism
    #[arg(long, env = "LABEL_OCR_WORKERS")]
    workers: Option<usize>,
}

impl PipelineArgs {
    fn into_config(self) -> config::PipelineConfig {
        config::PipelineConfig {
            det_model: self.det_model,
            rec_model: self.rec_model,
            dict_path: self.dict_path,
            pipe_command: self.pipe_command,
            pipe_args: self.pipe_args,
            stream_url: self.stream_url,
            confidence_threshold: self.threshold,
            device: self.device,
            workers: self.workers,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize a single label image via CLI
    Recognize {
        /// Image to process: a local path or an HTTP(S) URL
        image: String,

        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Output format (json, text, pretty)
        #[arg(long, default_value = "pretty")]
        output: String,
    },
    /// Start the HTTP server
    Serve {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Port to listen on
        #[arg(long, short, default_value = "8080", env = "LABEL_OCR_PORT")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0", env = "LABEL_OCR_HOST")]
        host: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    label_ocr::utils::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Recognize {
            image,
            pipeline,
            output,
        } => {
            info!("Processing {}", image);
            let config = pipeline.into_config();
            cli::run_once(&image, &config, &output).await?;
        }
        Commands::Serve {
            pipeline,
            port,
            host,
        } => {
            let config = config::ServerConfig {
                pipeline: pipeline.into_config(),
                host,
                port,
            };

            info!("Starting server on {}:{}", config.host, config.port);
            server::run_server(config).await?;
        }
    }

    Ok(())
}
