//! WebSocket recognition tier.
//!
//! Streams a crop to a remote vision model and collects text events back
//! over the same connection. One exchange per crop:
//!
//! 1. client sends the encoded image as binary frames;
//! 2. client sends a text frame `{"type": "image_complete", "prompt": ...}`;
//! 3. server replies with `chunk` events, then one `complete` event carrying
//!    the final text and optionally a confidence, or an `error` event.
//!
//! The connection is dedicated to the exchange and dropped afterwards. An
//! unreachable endpoint disables the tier for the process lifetime; errors
//! mid-exchange are per-call failures and the next crop connects fresh.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::core::{OCRError, OcrResult, ProcessingStage};
use crate::recognition::{RecognitionCandidate, RecognizerBackend};

const DEFAULT_PROMPT: &str = "Read the production label in this image. Return only the printed \
text, including the date and any batch or inspection marks, with single spaces between fields. \
If no text is visible, return an empty string.";

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_chunk_size() -> usize {
    64 * 1024
}

/// Configuration for the WebSocket tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamTierConfig {
    /// WebSocket endpoint, e.g. `ws://host:port/ocr`.
    pub url: String,
    /// Prompt sent with the image.
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Total timeout for one exchange in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Size of each binary upload frame in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl StreamTierConfig {
    /// Creates a config for the given endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            prompt: default_prompt(),
            timeout_ms: default_timeout_ms(),
            chunk_size: default_chunk_size(),
        }
    }

    /// Sets the prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Sets the exchange timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamRequest<'a> {
    ImageComplete { prompt: &'a str },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    /// Partial text produced while the model is still reading.
    Chunk { text: String },
    /// Final event of a successful exchange.
    Complete {
        #[serde(default)]
        text: String,
        confidence: Option<f32>,
    },
    /// Terminal server-side failure.
    Error { message: String },
}

/// Accumulates stream events into one candidate.
#[derive(Debug, Default)]
struct StreamAssembly {
    chunks: String,
}

impl StreamAssembly {
    /// Applies one event; returns the finished candidate on `complete`.
    fn apply(&mut self, event: StreamEvent) -> OcrResult<Option<RecognitionCandidate>> {
        match event {
            StreamEvent::Chunk { text } => {
                self.chunks.push_str(&text);
                Ok(None)
            }
            StreamEvent::Complete { text, confidence } => {
                // Servers that streamed everything as chunks may leave the
                // final text empty; ones that report no confidence are taken
                // at full confidence, matching remote readings that carry no
                // score of their own.
                let text = if text.is_empty() {
                    self.chunks.trim().to_string()
                } else {
                    text
                };
                Ok(Some(RecognitionCandidate::new(
                    text,
                    confidence.unwrap_or(1.0),
                )))
            }
            StreamEvent::Error { message } => Err(OCRError::protocol("stream", message)),
        }
    }
}

enum StreamCallError {
    /// The endpoint could not be reached at all.
    Unreachable(OCRError),
    /// The exchange started but failed.
    Call(OCRError),
}

struct StreamEngine {
    runtime: Runtime,
}

impl StreamEngine {
    fn build() -> OcrResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { runtime })
    }
}

/// WebSocket tier that dedicates one connection to each crop.
pub struct StreamTier {
    config: StreamTierConfig,
    engine: OnceLock<Option<StreamEngine>>,
    disabled: AtomicBool,
}

impl StreamTier {
    /// Creates the tier. No connection is made until the first call.
    pub fn new(config: StreamTierConfig) -> Self {
        Self {
            config,
            engine: OnceLock::new(),
            disabled: AtomicBool::new(false),
        }
    }

    fn engine(&self) -> Option<&StreamEngine> {
        self.engine
            .get_or_init(|| match StreamEngine::build() {
                Ok(engine) => Some(engine),
                Err(err) => {
                    tracing::warn!("Stream tier runtime failed to build, tier disabled: {}", err);
                    None
                }
            })
            .as_ref()
    }
}

impl RecognizerBackend for StreamTier {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn is_ready(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst) && !self.config.url.is_empty() && self.engine().is_some()
    }

    fn recognize(&self, crop: &RgbImage) -> OcrResult<RecognitionCandidate> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(OCRError::invalid_input("empty crop"));
        }
        if self.disabled.load(Ordering::SeqCst) {
            return Err(OCRError::protocol("stream", "tier disabled"));
        }
        let Some(engine) = self.engine() else {
            return Err(OCRError::protocol("stream", "runtime unavailable"));
        };

        let mut png = Vec::new();
        crop.write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|err| {
                OCRError::processing(ProcessingStage::Encoding, "png encode for stream", err)
            })?;

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let outcome = engine.runtime.block_on(async {
            match tokio::time::timeout(timeout, run_exchange(&self.config, &png)).await {
                Ok(result) => result,
                Err(_) => Err(StreamCallError::Call(OCRError::timeout("stream", timeout))),
            }
        });

        match outcome {
            Ok(candidate) => Ok(candidate),
            Err(StreamCallError::Unreachable(err)) => {
                self.disabled.store(true, Ordering::SeqCst);
                tracing::warn!("Stream tier disabled, endpoint unreachable: {}", err);
                Err(err)
            }
            Err(StreamCallError::Call(err)) => Err(err),
        }
    }
}

async fn run_exchange(
    config: &StreamTierConfig,
    png: &[u8],
) -> Result<RecognitionCandidate, StreamCallError> {
    let (stream, _) = connect_async(config.url.as_str()).await.map_err(|err| {
        StreamCallError::Unreachable(OCRError::protocol(
            "stream",
            format!("connect to {} failed: {}", config.url, err),
        ))
    })?;
    let (mut write, mut read) = stream.split();

    for chunk in png.chunks(config.chunk_size.max(1)) {
        write
            .send(Message::Binary(chunk.to_vec()))
            .await
            .map_err(|err| call_error(format!("image upload failed: {}", err)))?;
    }

    let request = serde_json::to_string(&StreamRequest::ImageComplete {
        prompt: &config.prompt,
    })
    .map_err(|err| call_error(format!("request encode: {}", err)))?;
    write
        .send(Message::Text(request))
        .await
        .map_err(|err| call_error(format!("prompt send failed: {}", err)))?;

    let mut assembly = StreamAssembly::default();
    while let Some(message) = read.next().await {
        let message = message.map_err(|err| call_error(format!("read failed: {}", err)))?;
        match message {
            Message::Text(text) => {
                let event: StreamEvent = serde_json::from_str(&text)
                    .map_err(|err| call_error(format!("malformed event: {}", err)))?;
                if let Some(candidate) = assembly.apply(event).map_err(StreamCallError::Call)? {
                    return Ok(candidate);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    Err(call_error("connection closed before completion".to_string()))
}

fn call_error(message: String) -> StreamCallError {
    StreamCallError::Call(OCRError::protocol("stream", message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parsing() {
        let event: StreamEvent = serde_json::from_str(r#"{"type": "chunk", "text": "生产"}"#).unwrap();
        assert!(matches!(event, StreamEvent::Chunk { text } if text == "生产"));

        let event: StreamEvent =
            serde_json::from_str(r#"{"type": "complete", "text": "合格", "confidence": 0.9}"#)
                .unwrap();
        assert!(matches!(
            event,
            StreamEvent::Complete { confidence: Some(c), .. } if (c - 0.9).abs() < 1e-6
        ));

        let event: StreamEvent =
            serde_json::from_str(r#"{"type": "error", "message": "model overloaded"}"#).unwrap();
        assert!(matches!(event, StreamEvent::Error { .. }));
    }

    #[test]
    fn test_request_shape() {
        let request = serde_json::to_string(&StreamRequest::ImageComplete { prompt: "read it" })
            .unwrap();
        assert_eq!(request, r#"{"type":"image_complete","prompt":"read it"}"#);
    }

    #[test]
    fn test_assembly_prefers_complete_text() {
        let mut assembly = StreamAssembly::default();
        assert!(assembly
            .apply(StreamEvent::Chunk {
                text: "partial".to_string()
            })
            .unwrap()
            .is_none());

        let candidate = assembly
            .apply(StreamEvent::Complete {
                text: "final text".to_string(),
                confidence: Some(0.8),
            })
            .unwrap()
            .unwrap();
        assert_eq!(candidate.text, "final text");
        assert!((candidate.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_assembly_falls_back_to_chunks_and_full_confidence() {
        let mut assembly = StreamAssembly::default();
        assembly
            .apply(StreamEvent::Chunk {
                text: "生产日期 ".to_string(),
            })
            .unwrap();
        assembly
            .apply(StreamEvent::Chunk {
                text: "2024/05/01".to_string(),
            })
            .unwrap();

        let candidate = assembly
            .apply(StreamEvent::Complete {
                text: String::new(),
                confidence: None,
            })
            .unwrap()
            .unwrap();
        assert_eq!(candidate.text, "生产日期 2024/05/01");
        assert_eq!(candidate.confidence, 1.0);
    }

    #[test]
    fn test_assembly_error_event() {
        let mut assembly = StreamAssembly::default();
        let err = assembly
            .apply(StreamEvent::Error {
                message: "model overloaded".to_string(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn test_unreachable_endpoint_disables_tier() {
        let tier = StreamTier::new(
            StreamTierConfig::new("ws://127.0.0.1:1/ocr").with_timeout_ms(2_000),
        );
        assert!(tier.is_ready());

        let err = tier.recognize(&RgbImage::new(8, 8)).unwrap_err();
        assert!(matches!(err, OCRError::Protocol { .. } | OCRError::Timeout { .. }));
        assert!(!tier.is_ready());
    }

    #[test]
    fn test_loopback_exchange() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        listener.set_nonblocking(true).unwrap();

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                let (socket, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();

                let mut image_bytes = 0usize;
                while let Some(Ok(message)) = ws.next().await {
                    match message {
                        Message::Binary(data) => image_bytes += data.len(),
                        Message::Text(text) => {
                            assert!(text.contains("image_complete"));
                            assert!(image_bytes > 0);
                            ws.send(Message::Text(
                                r#"{"type": "chunk", "text": "生产日期 2024/05/01"}"#.to_string(),
                            ))
                            .await
                            .unwrap();
                            ws.send(Message::Text(
                                r#"{"type": "complete", "text": "", "confidence": 0.88}"#
                                    .to_string(),
                            ))
                            .await
                            .unwrap();
                            break;
                        }
                        _ => {}
                    }
                }
            });
        });

        let tier = StreamTier::new(
            StreamTierConfig::new(format!("ws://{}/ocr", addr)).with_timeout_ms(5_000),
        );
        let candidate = tier.recognize(&RgbImage::new(16, 16)).unwrap();
        assert_eq!(candidate.text, "生产日期 2024/05/01");
        assert!((candidate.confidence - 0.88).abs() < 1e-6);
        assert!(tier.is_ready());
    }
}
