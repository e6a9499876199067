use serde::{Deserialize, Serialize};

use crate::runner::RunnerConfig;
use crate::session::SessionConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}
