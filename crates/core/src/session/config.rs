//! Project session configuration.

use serde::{Deserialize, Serialize};

use crate::model::QualityMode;

/// Configuration for a [`ProjectSession`](super::ProjectSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum concurrent estimation runs.
    #[serde(default = "default_concurrency")]
    pub estimation_concurrency: usize,

    /// Maximum concurrent render runs.
    #[serde(default = "default_concurrency")]
    pub render_concurrency: usize,

    /// Quality used by enqueues that do not specify one.
    #[serde(default)]
    pub quality: QualityMode,
}

fn default_concurrency() -> usize {
    2
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            estimation_concurrency: default_concurrency(),
            render_concurrency: default_concurrency(),
            quality: QualityMode::default(),
        }
    }
}
