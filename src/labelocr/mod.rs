//! The label pipeline module.
//!
//! [`LabelOCRBuilder`] wires the region detector and the recognition tiers
//! into a [`LabelOCR`] orchestrator. One `recognize` call runs detection,
//! per-region unwarping and tiered recognition, and deterministic assembly
//! into a [`PipelineResult`].

mod assemble;
mod ocr;
mod result;

pub use assemble::assemble;
pub use ocr::{LabelOCR, LabelOCRBuilder};
pub use result::{PipelineResult, TextRegion};
