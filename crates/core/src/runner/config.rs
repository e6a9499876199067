//! Configuration for the process-backed runner.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::EngineVersion;

/// Executables and model files for one engine generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineCommands {
    /// Feature estimation executable.
    pub estimator: PathBuf,
    /// Vocoder/render executable.
    pub renderer: PathBuf,
    /// Model directory passed to the estimator.
    #[serde(default)]
    pub model_dir: PathBuf,
    /// Additional arguments appended to every invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Configuration for [`ProcessRunner`](super::ProcessRunner).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Directory for per-job input/output files.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Timeout for a single invocation in seconds (none by default).
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Thread count passed to the executables.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Keep per-job work files after the invocation (for debugging).
    #[serde(default)]
    pub keep_work_files: bool,

    #[serde(default = "default_v1")]
    pub v1: EngineCommands,

    #[serde(default = "default_v2")]
    pub v2: EngineCommands,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("cantor-runner")
}

fn default_threads() -> usize {
    2
}

fn default_v1() -> EngineCommands {
    EngineCommands {
        estimator: PathBuf::from("neutrino-v1"),
        renderer: PathBuf::from("world-v1"),
        model_dir: PathBuf::from("model/v1"),
        extra_args: Vec::new(),
    }
}

fn default_v2() -> EngineCommands {
    EngineCommands {
        estimator: PathBuf::from("neutrino-v2"),
        renderer: PathBuf::from("nsf-v2"),
        model_dir: PathBuf::from("model/v2"),
        extra_args: Vec::new(),
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            timeout_secs: None,
            threads: default_threads(),
            keep_work_files: false,
            v1: default_v1(),
            v2: default_v2(),
        }
    }
}

impl RunnerConfig {
    /// Commands used for tracks of the given engine.
    pub fn commands(&self, engine: EngineVersion) -> &EngineCommands {
        match engine {
            EngineVersion::V1 => &self.v1,
            EngineVersion::V2 => &self.v2,
        }
    }

    /// Sets the work directory.
    pub fn with_work_dir(mut self, work_dir: PathBuf) -> Self {
        self.work_dir = work_dir;
        self
    }

    /// Sets the timeout in seconds.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Replaces the commands of one engine.
    pub fn with_commands(mut self, engine: EngineVersion, commands: EngineCommands) -> Self {
        match engine {
            EngineVersion::V1 => self.v1 = commands,
            EngineVersion::V2 => self.v2 = commands,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.threads, 2);
        assert!(config.timeout_secs.is_none());
        assert_eq!(
            config.commands(EngineVersion::V1).estimator,
            PathBuf::from("neutrino-v1")
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            timeout_secs = 120
            [v2]
            estimator = "/opt/engine/bin/estimate"
            renderer = "/opt/engine/bin/render"
        "#;
        let config: RunnerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.timeout_secs, Some(120));
        assert_eq!(
            config.v2.estimator,
            PathBuf::from("/opt/engine/bin/estimate")
        );
        assert!(config.v2.extra_args.is_empty());
        assert_eq!(config.v1, default_v1());
    }

    #[test]
    fn test_config_builder() {
        let config = RunnerConfig::default()
            .with_work_dir(PathBuf::from("/tmp/jobs"))
            .with_timeout(30);
        assert_eq!(config.work_dir, PathBuf::from("/tmp/jobs"));
        assert_eq!(config.timeout_secs, Some(30));
    }
}
