//! Utility functions for the label pipeline.
//!
//! This module provides the perspective unwarp used to rectify detected
//! regions and the logging setup shared by the binaries.

pub mod transform;

pub use transform::unwarp_quad;

/// Initializes the tracing subscriber for logging.
///
/// This function sets up the tracing subscriber with environment filter and
/// formatting layer. It's typically called at the start of an application to
/// enable logging.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
