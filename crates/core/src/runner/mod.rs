//! Runner module: the external estimation/render processes.
//!
//! The scheduler only sees the [`SynthesisRunner`] trait. [`ProcessRunner`]
//! is the production implementation that invokes the engine executables
//! configured per [`EngineVersion`](crate::model::EngineVersion); tests use
//! [`MockRunner`](crate::testing::MockRunner).
//!
//! # Example
//!
//! ```ignore
//! use cantor_core::runner::{ProcessRunner, RunnerConfig, SynthesisRunner};
//!
//! let runner = ProcessRunner::new(RunnerConfig::default());
//! runner.validate().await?;
//!
//! let features = runner.estimate(request, cancel.clone(), Some(progress_tx)).await?;
//! ```

mod config;
mod error;
mod process;
mod traits;
mod types;

pub use config::{EngineCommands, RunnerConfig};
pub use error::RunnerError;
pub use process::ProcessRunner;
pub use traits::SynthesisRunner;
pub use types::{
    decode_pcm_s16le, encode_pcm_s16le, EstimationRequest, RenderRequest, RunnerProgress,
    RunnerStage,
};
