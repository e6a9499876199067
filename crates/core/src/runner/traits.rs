//! Trait definitions for the runner module.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::RunnerError;
use super::types::{EstimationRequest, RenderRequest, RunnerProgress};
use crate::model::AcousticFeatures;

/// Executes the external estimation and rendering steps.
///
/// Both operations must return [`RunnerError::Cancelled`] promptly once
/// `cancel` is signalled, terminating any child process they started.
/// Progress is a best-effort side channel; a full or dropped receiver must
/// not affect the result.
#[async_trait]
pub trait SynthesisRunner: Send + Sync {
    /// Returns the name of this runner implementation.
    fn name(&self) -> &str;

    /// Estimates acoustic features for the requested time range.
    async fn estimate(
        &self,
        request: EstimationRequest,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<RunnerProgress>>,
    ) -> Result<AcousticFeatures, RunnerError>;

    /// Renders features into signed 16-bit little-endian PCM bytes.
    async fn render(
        &self,
        request: RenderRequest,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<RunnerProgress>>,
    ) -> Result<Vec<u8>, RunnerError>;

    /// Validates that the runner is properly configured and ready.
    async fn validate(&self) -> Result<(), RunnerError> {
        Ok(())
    }
}
