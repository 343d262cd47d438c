//! Escalation across recognition tiers.
//!
//! Tiers are consulted in registration order. A tier that is not ready is
//! skipped without counting as an attempt; a ready tier is attempted exactly
//! once per crop. The first non-empty candidate at or above the confidence
//! threshold wins immediately. When no tier reaches the threshold, the most
//! confident non-empty candidate seen so far is returned, and when every tier
//! fails or produces nothing the result is the empty candidate.

use image::RgbImage;

use crate::recognition::{RecognitionCandidate, RecognizerBackend};

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.95;

/// Ordered set of recognition backends with early-exit escalation.
pub struct TieredRecognizer {
    backends: Vec<Box<dyn RecognizerBackend>>,
    confidence_threshold: f32,
}

impl TieredRecognizer {
    /// Starts building a recognizer.
    pub fn builder() -> TieredRecognizerBuilder {
        TieredRecognizerBuilder::new()
    }

    /// Number of registered backends, ready or not.
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Runs the escalation chain over one crop.
    ///
    /// Never fails: tier errors are logged and treated as "this tier
    /// produced nothing".
    pub fn recognize(&self, crop: &RgbImage) -> RecognitionCandidate {
        let mut best: Option<RecognitionCandidate> = None;

        for backend in &self.backends {
            if !backend.is_ready() {
                tracing::debug!("Tier '{}' not ready, skipping", backend.name());
                continue;
            }
            match backend.recognize(crop) {
                Ok(candidate) => {
                    if candidate.is_empty() {
                        tracing::debug!("Tier '{}' produced no text", backend.name());
                        continue;
                    }
                    if candidate.confidence >= self.confidence_threshold {
                        return candidate;
                    }
                    tracing::debug!(
                        "Tier '{}' at {:.3} below threshold {:.3}, escalating",
                        backend.name(),
                        candidate.confidence,
                        self.confidence_threshold
                    );
                    // Strict comparison keeps the earlier tier on ties.
                    let replace = best
                        .as_ref()
                        .map(|current| candidate.confidence > current.confidence)
                        .unwrap_or(true);
                    if replace {
                        best = Some(candidate);
                    }
                }
                Err(err) => {
                    tracing::warn!("Tier '{}' failed: {}", backend.name(), err);
                }
            }
        }

        best.unwrap_or_default()
    }
}

/// Builder for [`TieredRecognizer`].
pub struct TieredRecognizerBuilder {
    backends: Vec<Box<dyn RecognizerBackend>>,
    confidence_threshold: f32,
}

impl TieredRecognizerBuilder {
    /// Creates a builder with no backends and the default threshold.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    /// Appends a backend after the ones already registered.
    pub fn backend(mut self, backend: impl RecognizerBackend + 'static) -> Self {
        self.backends.push(Box::new(backend));
        self
    }

    /// Appends an already-boxed backend.
    pub fn boxed_backend(mut self, backend: Box<dyn RecognizerBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Sets the confidence below which escalation continues.
    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Finishes the recognizer.
    pub fn build(self) -> TieredRecognizer {
        TieredRecognizer {
            backends: self.backends,
            confidence_threshold: self.confidence_threshold,
        }
    }
}

impl Default for TieredRecognizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OCRError, OcrResult};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    enum MockOutcome {
        Text(&'static str, f32),
        Fail,
    }

    struct MockBackend {
        label: &'static str,
        ready: AtomicBool,
        disable_on_fail: bool,
        outcome: MockOutcome,
        calls: Arc<AtomicUsize>,
    }

    impl MockBackend {
        fn ok(label: &'static str, text: &'static str, confidence: f32) -> (Self, Arc<AtomicUsize>) {
            Self::build(label, true, false, MockOutcome::Text(text, confidence))
        }

        fn failing(label: &'static str) -> (Self, Arc<AtomicUsize>) {
            Self::build(label, true, false, MockOutcome::Fail)
        }

        fn failing_then_offline(label: &'static str) -> (Self, Arc<AtomicUsize>) {
            Self::build(label, true, true, MockOutcome::Fail)
        }

        fn offline(label: &'static str) -> (Self, Arc<AtomicUsize>) {
            Self::build(label, false, false, MockOutcome::Text("unreachable", 1.0))
        }

        fn build(
            label: &'static str,
            ready: bool,
            disable_on_fail: bool,
            outcome: MockOutcome,
        ) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let backend = Self {
                label,
                ready: AtomicBool::new(ready),
                disable_on_fail,
                outcome,
                calls: Arc::clone(&calls),
            };
            (backend, calls)
        }
    }

    impl RecognizerBackend for MockBackend {
        fn name(&self) -> &'static str {
            self.label
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn recognize(&self, _crop: &RgbImage) -> OcrResult<RecognitionCandidate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                MockOutcome::Text(text, confidence) => {
                    Ok(RecognitionCandidate::new(text, confidence))
                }
                MockOutcome::Fail => {
                    if self.disable_on_fail {
                        self.ready.store(false, Ordering::SeqCst);
                    }
                    Err(OCRError::protocol("mock", "backend failure"))
                }
            }
        }
    }

    fn crop() -> RgbImage {
        RgbImage::new(32, 16)
    }

    #[test]
    fn test_confident_first_tier_short_circuits() {
        let (first, first_calls) = MockBackend::ok("local", "生产日期 2024/05/01", 0.97);
        let (second, second_calls) = MockBackend::ok("pipe", "other reading", 0.99);
        let recognizer = TieredRecognizer::builder().backend(first).backend(second).build();

        let candidate = recognizer.recognize(&crop());
        assert_eq!(candidate.text, "生产日期 2024/05/01");
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let (first, _) = MockBackend::ok("local", "exactly at threshold", 0.95);
        let (second, second_calls) = MockBackend::ok("pipe", "never reached", 1.0);
        let recognizer = TieredRecognizer::builder().backend(first).backend(second).build();

        let candidate = recognizer.recognize(&crop());
        assert_eq!(candidate.text, "exactly at threshold");
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unready_tier_is_skipped_silently() {
        let (first, first_calls) = MockBackend::offline("local");
        let (second, _) = MockBackend::ok("pipe", "CH 合格", 0.96);
        let recognizer = TieredRecognizer::builder().backend(first).backend(second).build();

        let candidate = recognizer.recognize(&crop());
        assert_eq!(candidate.text, "CH 合格");
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_best_candidate_wins_when_none_meet_threshold() {
        let (first, first_calls) = MockBackend::ok("local", "blurry", 0.40);
        let (second, second_calls) = MockBackend::ok("pipe", "better", 0.80);
        let (third, third_calls) = MockBackend::ok("stream", "worse", 0.60);
        let recognizer = TieredRecognizer::builder()
            .backend(first)
            .backend(second)
            .backend(third)
            .build();

        let candidate = recognizer.recognize(&crop());
        assert_eq!(candidate.text, "better");
        assert!((candidate.confidence - 0.80).abs() < 1e-6);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tie_keeps_earlier_tier() {
        let (first, _) = MockBackend::ok("local", "first", 0.50);
        let (second, _) = MockBackend::ok("pipe", "second", 0.50);
        let recognizer = TieredRecognizer::builder().backend(first).backend(second).build();

        assert_eq!(recognizer.recognize(&crop()).text, "first");
    }

    #[test]
    fn test_empty_candidate_does_not_shadow_real_text() {
        let (first, _) = MockBackend::ok("local", "  ", 0.99);
        let (second, _) = MockBackend::ok("pipe", "real text", 0.50);
        let recognizer = TieredRecognizer::builder().backend(first).backend(second).build();

        let candidate = recognizer.recognize(&crop());
        assert_eq!(candidate.text, "real text");
        assert!((candidate.confidence - 0.50).abs() < 1e-6);
    }

    #[test]
    fn test_all_tiers_failing_returns_empty_candidate() {
        let (first, first_calls) = MockBackend::failing("local");
        let (second, second_calls) = MockBackend::failing("pipe");
        let recognizer = TieredRecognizer::builder().backend(first).backend(second).build();

        let candidate = recognizer.recognize(&crop());
        assert!(candidate.text.is_empty());
        assert_eq!(candidate.confidence, 0.0);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_tier_is_not_reattempted() {
        let (first, first_calls) = MockBackend::failing_then_offline("stream");
        let (second, second_calls) = MockBackend::ok("pipe", "fallback", 0.99);
        let recognizer = TieredRecognizer::builder().backend(first).backend(second).build();

        assert_eq!(recognizer.recognize(&crop()).text, "fallback");
        assert_eq!(recognizer.recognize(&crop()).text, "fallback");
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_backends_yields_empty_candidate() {
        let recognizer = TieredRecognizer::builder().build();
        let candidate = recognizer.recognize(&crop());
        assert!(candidate.text.is_empty());
        assert_eq!(candidate.confidence, 0.0);
        assert_eq!(recognizer.backend_count(), 0);
    }
}
