//! Shared configuration types for the pipeline.

use serde::{Deserialize, Serialize};

fn default_region_threshold() -> usize {
    2
}

/// Policy controlling region-level parallelism inside a pipeline call.
///
/// Recognition of independent crops can fan out over rayon. Small calls stay
/// sequential: below `region_threshold` regions the coordination overhead
/// outweighs the win.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelPolicy {
    /// Maximum number of rayon threads; `None` keeps rayon's default.
    pub max_threads: Option<usize>,
    /// Minimum number of regions before recognition fans out in parallel.
    #[serde(default = "default_region_threshold")]
    pub region_threshold: usize,
}

impl Default for ParallelPolicy {
    fn default() -> Self {
        Self {
            max_threads: None,
            region_threshold: default_region_threshold(),
        }
    }
}

impl ParallelPolicy {
    /// Creates a policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of rayon threads.
    pub fn with_max_threads(mut self, threads: Option<usize>) -> Self {
        self.max_threads = threads;
        self
    }

    /// Sets the minimum region count for parallel recognition.
    pub fn with_region_threshold(mut self, threshold: usize) -> Self {
        self.region_threshold = threshold;
        self
    }

    /// Whether a call with `regions` crops should fan out.
    pub fn should_parallelize(&self, regions: usize) -> bool {
        regions > 1 && regions >= self.region_threshold
    }

    /// Installs a global rayon thread pool sized by `max_threads`.
    ///
    /// A no-op when `max_threads` is unset. Safe to call once per process;
    /// later calls fail if the global pool already exists.
    pub fn install_global_thread_pool(&self) -> Result<(), rayon::ThreadPoolBuildError> {
        if let Some(threads) = self.max_threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
        } else {
            Ok(())
        }
    }
}
