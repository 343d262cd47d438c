//! Subprocess recognition tier.
//!
//! Talks to a persistent OCR worker process over stdio, one JSON object per
//! line in each direction. The request carries the crop as base64 PNG; the
//! response carries a status code and, on success, a list of text records:
//!
//! ```json
//! {"image_base64": "..."}
//! {"code": 100, "data": [{"text": "生产日期", "score": 0.98}]}
//! ```
//!
//! Code 100 is success, 101 is "no text found", anything else is a worker
//! error. Non-JSON lines (startup banners, stray logging) are skipped. The
//! pipe is a single stateful channel: after a timeout or I/O failure the
//! request/response pairing can no longer be trusted, so the worker is
//! killed and the tier disables itself for the rest of the process.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use crate::core::{OCRError, OcrResult, ProcessingStage};
use crate::recognition::{RecognitionCandidate, RecognizerBackend};

fn default_timeout_ms() -> u64 {
    10_000
}

/// Configuration for the subprocess tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeTierConfig {
    /// Worker executable.
    pub command: String,
    /// Arguments passed to the worker.
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl PipeTierConfig {
    /// Creates a config for the given worker command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Sets the worker arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[derive(Serialize)]
struct PipeRequest<'a> {
    image_base64: &'a str,
}

#[derive(Debug, Deserialize)]
struct PipeResponse {
    code: u32,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PipeRecord {
    #[serde(default)]
    text: String,
    #[serde(default)]
    score: f32,
}

struct PipeWorker {
    child: Child,
    stdin: ChildStdin,
    lines: mpsc::Receiver<std::io::Result<String>>,
}

impl PipeWorker {
    fn spawn(config: &PipeTierConfig) -> OcrResult<Self> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                OCRError::model_load(
                    config.command.clone(),
                    "worker spawn failed",
                    Some(Box::new(err)),
                )
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OCRError::protocol("pipe", "worker stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OCRError::protocol("pipe", "worker stdout unavailable"))?;

        let (sender, receiver) = mpsc::channel();
        thread::Builder::new()
            .name("pipe-ocr-reader".to_string())
            .spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            child,
            stdin,
            lines: receiver,
        })
    }

    /// Sends one request line and waits for the matching response line,
    /// skipping anything on the pipe that is not a protocol message.
    fn exchange(&mut self, request: &str, timeout: Duration) -> OcrResult<PipeResponse> {
        writeln!(self.stdin, "{}", request)?;
        self.stdin.flush()?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(OCRError::timeout("pipe", timeout));
            }
            match self.lines.recv_timeout(remaining) {
                Ok(Ok(line)) => match serde_json::from_str::<PipeResponse>(&line) {
                    Ok(response) => return Ok(response),
                    Err(_) => {
                        tracing::debug!("Ignoring non-protocol worker line: {}", line.trim());
                    }
                },
                Ok(Err(err)) => return Err(err.into()),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(OCRError::timeout("pipe", timeout));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(OCRError::protocol("pipe", "worker closed its output"));
                }
            }
        }
    }
}

impl Drop for PipeWorker {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Subprocess tier with a lazily spawned persistent worker.
pub struct PipeTier {
    config: PipeTierConfig,
    worker: OnceLock<Option<Mutex<PipeWorker>>>,
    disabled: AtomicBool,
}

impl PipeTier {
    /// Creates the tier. The worker is not spawned until the first call.
    pub fn new(config: PipeTierConfig) -> Self {
        Self {
            config,
            worker: OnceLock::new(),
            disabled: AtomicBool::new(false),
        }
    }

    fn worker(&self) -> Option<&Mutex<PipeWorker>> {
        self.worker
            .get_or_init(|| match PipeWorker::spawn(&self.config) {
                Ok(worker) => {
                    tracing::info!("OCR worker started: {}", self.config.command);
                    Some(Mutex::new(worker))
                }
                Err(err) => {
                    tracing::warn!(
                        "OCR worker failed to start ({}), pipe tier disabled: {}",
                        self.config.command,
                        err
                    );
                    None
                }
            })
            .as_ref()
    }
}

impl RecognizerBackend for PipeTier {
    fn name(&self) -> &'static str {
        "pipe"
    }

    fn is_ready(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst) && self.worker().is_some()
    }

    fn recognize(&self, crop: &RgbImage) -> OcrResult<RecognitionCandidate> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(OCRError::invalid_input("empty crop"));
        }
        if self.disabled.load(Ordering::SeqCst) {
            return Err(OCRError::protocol("pipe", "tier disabled"));
        }
        let Some(worker) = self.worker() else {
            return Err(OCRError::protocol("pipe", "worker unavailable"));
        };

        let mut png = Vec::new();
        crop.write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|err| {
                OCRError::processing(ProcessingStage::Encoding, "png encode for worker", err)
            })?;
        let encoded = BASE64.encode(&png);
        let request = serde_json::to_string(&PipeRequest {
            image_base64: &encoded,
        })
        .map_err(|err| OCRError::protocol("pipe", format!("request encode: {}", err)))?;

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let response = {
            let mut guard = match worker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match guard.exchange(&request, timeout) {
                Ok(response) => response,
                Err(err) => {
                    // The channel may hold a late or partial response now;
                    // the pairing cannot be re-synchronized.
                    let _ = guard.child.kill();
                    drop(guard);
                    self.disabled.store(true, Ordering::SeqCst);
                    tracing::warn!("Pipe tier disabled after transport failure: {}", err);
                    return Err(err);
                }
            }
        };

        match response.code {
            100 => {
                let records: Vec<PipeRecord> = serde_json::from_value(response.data)
                    .map_err(|err| {
                        OCRError::protocol("pipe", format!("malformed data field: {}", err))
                    })?;
                Ok(merge_records(&records))
            }
            101 => Ok(RecognitionCandidate::default()),
            code => Err(OCRError::protocol(
                "pipe",
                format!("worker returned code {}", code),
            )),
        }
    }
}

/// Joins record texts in worker order; the confidence of the merged reading
/// is the weakest record score.
fn merge_records(records: &[PipeRecord]) -> RecognitionCandidate {
    if records.is_empty() {
        return RecognitionCandidate::default();
    }
    let text = records
        .iter()
        .map(|record| record.text.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let confidence = records
        .iter()
        .map(|record| record.score)
        .fold(f32::INFINITY, f32::min);
    RecognitionCandidate::new(text, confidence)
}
