//! Local CRNN recognition tier.
//!
//! Runs a PaddleOCR-style recognition model through ONNX Runtime and decodes
//! the CTC output greedily. This is the cheapest tier and handles the large
//! majority of crops; the session loads lazily and a failed load disables
//! the tier for the rest of the process.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use image::{imageops, RgbImage};
use ndarray::{s, Array4, ArrayViewD, IxDyn};
use ort::session::Session;
use ort::value::Value;
use serde::{Deserialize, Serialize};

use crate::core::{build_session, OCRError, OcrResult, OrtSessionConfig};
use crate::processors::NormalizeImage;
use crate::recognition::{RecognitionCandidate, RecognizerBackend};

/// Input height of the recognition model.
pub const REC_INPUT_HEIGHT: u32 = 48;

/// Fixed input width; narrower crops are zero-padded on the right.
pub const REC_INPUT_WIDTH: u32 = 320;

/// Configuration for the local recognition tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastTierConfig {
    /// Path to the ONNX recognition model.
    pub model_path: PathBuf,
    /// Path to the character dictionary, one character per line.
    pub dict_path: PathBuf,
    /// ONNX Runtime session options.
    #[serde(default)]
    pub session: OrtSessionConfig,
}

impl FastTierConfig {
    /// Creates a config from the two asset paths.
    pub fn new(model_path: impl Into<PathBuf>, dict_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            dict_path: dict_path.into(),
            session: OrtSessionConfig::default(),
        }
    }

    /// Sets the session options.
    pub fn with_session(mut self, session: OrtSessionConfig) -> Self {
        self.session = session;
        self
    }
}

struct FastEngine {
    session: Mutex<Session>,
    input_name: String,
    dictionary: Vec<char>,
    normalize: NormalizeImage,
}

impl FastEngine {
    fn load(config: &FastTierConfig) -> OcrResult<Self> {
        let dictionary = load_dictionary(&config.dict_path)?;
        let session = build_session(&config.model_path, &config.session)?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "x".to_string());

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            dictionary,
            normalize: NormalizeImage::for_recognition()?,
        })
    }
}

/// Local CRNN tier with a lazily initialized ONNX session.
pub struct FastTier {
    config: FastTierConfig,
    engine: OnceLock<Option<FastEngine>>,
}

impl FastTier {
    /// Creates the tier. Model and dictionary are not touched until the
    /// first call.
    pub fn new(config: FastTierConfig) -> Self {
        Self {
            config,
            engine: OnceLock::new(),
        }
    }

    fn engine(&self) -> Option<&FastEngine> {
        self.engine
            .get_or_init(|| match FastEngine::load(&self.config) {
                Ok(engine) => {
                    tracing::info!(
                        "Recognition model loaded from {} ({} dictionary entries)",
                        self.config.model_path.display(),
                        engine.dictionary.len()
                    );
                    Some(engine)
                }
                Err(err) => {
                    tracing::warn!(
                        "Recognition model failed to load from {}, local tier disabled: {}",
                        self.config.model_path.display(),
                        err
                    );
                    None
                }
            })
            .as_ref()
    }
}

impl RecognizerBackend for FastTier {
    fn name(&self) -> &'static str {
        "local"
    }

    fn is_ready(&self) -> bool {
        self.engine().is_some()
    }

    fn recognize(&self, crop: &RgbImage) -> OcrResult<RecognitionCandidate> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(OCRError::invalid_input("empty crop"));
        }
        let Some(engine) = self.engine() else {
            return Err(OCRError::model_load(
                self.config.model_path.display().to_string(),
                "engine unavailable",
                None,
            ));
        };

        let resized = resize_for_recognition(crop);
        let width = resized.width() as usize;
        let tensor = engine.normalize.normalize_to(&resized)?;

        // Zero-pad the normalized tensor on the right up to the fixed width.
        let mut padded = Array4::<f32>::zeros((
            1,
            3,
            REC_INPUT_HEIGHT as usize,
            REC_INPUT_WIDTH as usize,
        ));
        padded.slice_mut(s![.., .., .., ..width]).assign(&tensor);

        let input_value = Value::from_array(padded)?;
        let candidate = {
            let mut session = match engine.session.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let outputs = session.run(ort::inputs![engine.input_name.as_str() => input_value])?;
            let output = outputs[0].try_extract_array::<f32>()?;
            ctc_greedy_decode(&output, &engine.dictionary)?
        };

        Ok(candidate)
    }
}

/// Loads a CTC character dictionary, one character per line.
///
/// Index 0 is the blank token; a space entry is appended after the file's
/// characters to match models trained with a space class.
fn load_dictionary(path: &Path) -> OcrResult<Vec<char>> {
    let file = File::open(path).map_err(|err| {
        OCRError::model_load(
            path.display().to_string(),
            "dictionary open failed",
            Some(Box::new(err)),
        )
    })?;

    let reader = BufReader::new(file);
    let mut dictionary = vec![' '];
    for line in reader.lines() {
        let line = line?;
        if let Some(ch) = line.chars().next() {
            dictionary.push(ch);
        }
    }
    dictionary.push(' ');

    Ok(dictionary)
}

/// Scales a crop to the model's input height, capping width at the fixed
/// input width.
fn resize_for_recognition(crop: &RgbImage) -> RgbImage {
    let scale = REC_INPUT_HEIGHT as f32 / crop.height() as f32;
    let width = ((crop.width() as f32 * scale).round() as u32).clamp(1, REC_INPUT_WIDTH);
    imageops::resize(crop, width, REC_INPUT_HEIGHT, imageops::FilterType::Lanczos3)
}

/// Greedy CTC decoding: argmax per timestep, skip blanks, collapse repeats.
///
/// Accepts `[1, T, C]` or `[T, C]` outputs. Confidence is the mean of the
/// kept per-character probabilities.
fn ctc_greedy_decode(
    output: &ArrayViewD<'_, f32>,
    dictionary: &[char],
) -> OcrResult<RecognitionCandidate> {
    let shape = output.shape();
    let (seq_len, num_classes) = match shape {
        [1, t, c] | [t, c] => (*t, *c),
        other => {
            return Err(OCRError::inference(
                "crnn-recognizer",
                format!("unexpected output shape {:?}", other),
                std::io::Error::new(std::io::ErrorKind::InvalidData, "bad output rank"),
            ));
        }
    };

    let mut text = String::new();
    let mut kept_probs = Vec::new();
    let mut prev_index: Option<usize> = None;

    for t in 0..seq_len {
        let mut max_prob = f32::NEG_INFINITY;
        let mut max_index = 0usize;
        for c in 0..num_classes {
            let prob = if shape.len() == 3 {
                output[IxDyn(&[0, t, c])]
            } else {
                output[IxDyn(&[t, c])]
            };
            if prob > max_prob {
                max_prob = prob;
                max_index = c;
            }
        }

        if max_index != 0 && Some(max_index) != prev_index {
            if let Some(ch) = dictionary.get(max_index) {
                text.push(*ch);
                kept_probs.push(max_prob);
            }
        }

        prev_index = if max_index == 0 { None } else { Some(max_index) };
    }

    let confidence = if kept_probs.is_empty() {
        0.0
    } else {
        (kept_probs.iter().sum::<f32>() / kept_probs.len() as f32).clamp(0.0, 1.0)
    };

    Ok(RecognitionCandidate::new(text, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::io::Write;

    fn decode(rows: &[(usize, f32)], num_classes: usize, dictionary: &[char]) -> RecognitionCandidate {
        let mut output = Array3::<f32>::zeros((1, rows.len(), num_classes));
        for (t, (index, prob)) in rows.iter().enumerate() {
            output[[0, t, *index]] = *prob;
        }
        let dyn_view = output.view().into_dyn();
        ctc_greedy_decode(&dyn_view, dictionary).unwrap()
    }

    #[test]
    fn test_ctc_decode_collapses_repeats_and_blanks() {
        let dictionary = [' ', 'a', 'b', 'c'];
        // a a <blank> a b -> "aab"
        let candidate = decode(
            &[(1, 0.9), (1, 0.9), (0, 0.8), (1, 0.7), (2, 0.6)],
            4,
            &dictionary,
        );
        assert_eq!(candidate.text, "aab");
        assert!((candidate.confidence - (0.9 + 0.7 + 0.6) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_decode_all_blanks_is_empty() {
        let dictionary = [' ', 'a'];
        let candidate = decode(&[(0, 0.99), (0, 0.98), (0, 0.97)], 2, &dictionary);
        assert!(candidate.text.is_empty());
        assert_eq!(candidate.confidence, 0.0);
    }

    #[test]
    fn test_ctc_decode_ignores_out_of_dictionary_index() {
        let dictionary = [' ', 'a'];
        // Index 5 has no dictionary entry and contributes nothing.
        let candidate = decode(&[(1, 0.9), (5, 0.9)], 6, &dictionary);
        assert_eq!(candidate.text, "a");
    }

    #[test]
    fn test_ctc_decode_two_dim_output() {
        let dictionary = [' ', 'x', 'y'];
        let mut output = ndarray::Array2::<f32>::zeros((2, 3));
        output[[0, 1]] = 0.8;
        output[[1, 2]] = 0.9;
        let dyn_view = output.view().into_dyn();
        let candidate = ctc_greedy_decode(&dyn_view, &dictionary).unwrap();
        assert_eq!(candidate.text, "xy");
    }

    #[test]
    fn test_load_dictionary_blank_and_space() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a").unwrap();
        writeln!(file, "b").unwrap();
        writeln!(file, "生").unwrap();
        file.flush().unwrap();

        let dictionary = load_dictionary(file.path()).unwrap();
        assert_eq!(dictionary, vec![' ', 'a', 'b', '生', ' ']);
    }

    #[test]
    fn test_resize_keeps_aspect_and_caps_width() {
        let crop = RgbImage::new(96, 24);
        let resized = resize_for_recognition(&crop);
        assert_eq!(resized.dimensions(), (192, REC_INPUT_HEIGHT));

        let wide = RgbImage::new(4000, 48);
        let resized = resize_for_recognition(&wide);
        assert_eq!(resized.dimensions(), (REC_INPUT_WIDTH, REC_INPUT_HEIGHT));
    }

    #[test]
    fn test_missing_assets_disable_tier() {
        let tier = FastTier::new(FastTierConfig::new(
            "/nonexistent/rec.onnx",
            "/nonexistent/keys.txt",
        ));
        assert!(!tier.is_ready());
        assert!(tier.recognize(&RgbImage::new(32, 16)).is_err());
    }
}
