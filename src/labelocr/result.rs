//! Result types returned by the label pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::processors::Quadrilateral;

/// One recognized region of a label.
///
/// Serializable so a storage collaborator can persist the box list as JSON
/// next to the combined reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRegion {
    /// Region corners in source-image coordinates, corner-ordered.
    pub quad: Quadrilateral,
    /// Recognized text for this region.
    pub text: String,
    /// Confidence of the winning candidate.
    pub confidence: f32,
}

impl TextRegion {
    /// Creates a recognized region.
    pub fn new(quad: Quadrilateral, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            quad,
            text: text.into(),
            confidence,
        }
    }
}

/// Final output of one pipeline call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Region texts joined in label reading order.
    pub text: String,
    /// Minimum confidence across the accepted regions; 0.0 when empty.
    pub confidence: f32,
    /// Accepted regions in the same order as `text`.
    pub regions: Vec<TextRegion>,
    /// Wall-clock duration of the call.
    pub elapsed: Duration,
}

impl PipelineResult {
    /// The terminal result for a call that found nothing.
    pub fn empty(elapsed: Duration) -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            regions: Vec::new(),
            elapsed,
        }
    }

    /// Whether no region survived the pipeline.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result() {
        let result = PipelineResult::empty(Duration::from_millis(12));
        assert!(result.is_empty());
        assert!(result.text.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.elapsed, Duration::from_millis(12));
    }

    #[test]
    fn test_region_serializes_with_quad() {
        let region = TextRegion::new(
            Quadrilateral::from_rect(1.0, 2.0, 11.0, 6.0),
            "生产日期",
            0.97,
        );
        let json = serde_json::to_string(&region).unwrap();
        assert!(json.contains("\"text\":\"生产日期\""));
        assert!(json.contains("\"points\""));

        let back: TextRegion = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text, region.text);
        assert_eq!(back.quad.points, region.quad.points);
    }

    #[test]
    fn test_result_round_trips() {
        let result = PipelineResult {
            text: "生产日期 2024/05/01".to_string(),
            confidence: 0.91,
            regions: vec![TextRegion::new(
                Quadrilateral::from_rect(0.0, 0.0, 10.0, 4.0),
                "生产日期 2024/05/01",
                0.91,
            )],
            elapsed: Duration::from_millis(250),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: PipelineResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text, result.text);
        assert_eq!(back.regions.len(), 1);
        assert_eq!(back.elapsed, result.elapsed);
    }
}
