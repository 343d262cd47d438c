//! Shared enums for image preprocessing.

use serde::{Deserialize, Serialize};

/// Specifies which image dimension a resize limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    /// Cap the longer dimension at the limit.
    #[default]
    Max,
    /// Grow the shorter dimension up to the limit.
    Min,
}

/// Specifies the color channel order a model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
    /// Red, Green, Blue order (native order of `image::RgbImage`).
    #[default]
    RGB,
    /// Blue, Green, Red order (used by OpenCV and PaddlePaddle models).
    BGR,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_type_serde_lowercase() {
        assert_eq!(
            serde_json::from_str::<LimitType>("\"max\"").unwrap(),
            LimitType::Max
        );
        assert_eq!(
            serde_json::from_str::<LimitType>("\"min\"").unwrap(),
            LimitType::Min
        );
    }

    #[test]
    fn test_color_order_default_is_rgb() {
        assert_eq!(ColorOrder::default(), ColorOrder::RGB);
    }
}
