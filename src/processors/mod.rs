//! Image and tensor processing used by detection and recognition.

pub mod db_postprocess;
pub mod geometry;
pub mod normalization;
pub mod types;

pub use db_postprocess::{DbPostProcess, DbPostProcessConfig};
pub use geometry::{BoundingBox, MinAreaRect, Point, Quadrilateral};
pub use normalization::NormalizeImage;
pub use types::{ColorOrder, LimitType};
