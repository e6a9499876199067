//! Phrase lifecycle state machine.
//!
//! ```text
//! WaitEstimate -> EstimateProcessing -> WaitAudioRender -> AudioRenderProcessing -> Complete
//!                        |                                         |
//!                        v                                         v
//!                  EstimateError                            AudioRenderError
//! ```
//!
//! Any state may be reset to `WaitEstimate` (a new estimation request), and any
//! state that already owns acoustic features may be reset to `WaitAudioRender`
//! (a new render request).

use serde::{Deserialize, Serialize};

/// Status of a single phrase within the synthesis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhraseStatus {
    /// Queued for acoustic feature estimation.
    #[default]
    WaitEstimate,
    /// Estimation is running.
    EstimateProcessing,
    /// Estimation failed.
    EstimateError,
    /// Features are ready, queued for audio rendering.
    WaitAudioRender,
    /// Rendering is running.
    AudioRenderProcessing,
    /// Rendering failed.
    AudioRenderError,
    /// Audio for the phrase is in the track waveform.
    Complete,
}

impl PhraseStatus {
    /// All states, in pipeline order.
    pub const ALL: [PhraseStatus; 7] = [
        Self::WaitEstimate,
        Self::EstimateProcessing,
        Self::EstimateError,
        Self::WaitAudioRender,
        Self::AudioRenderProcessing,
        Self::AudioRenderError,
        Self::Complete,
    ];

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: PhraseStatus) -> bool {
        use PhraseStatus::*;
        match next {
            WaitEstimate => true,
            EstimateProcessing => *self == WaitEstimate,
            EstimateError => *self == EstimateProcessing,
            WaitAudioRender => matches!(
                self,
                EstimateProcessing | WaitAudioRender | AudioRenderProcessing | AudioRenderError | Complete
            ),
            AudioRenderProcessing => *self == WaitAudioRender,
            AudioRenderError | Complete => *self == AudioRenderProcessing,
        }
    }

    /// Error side-states; terminal until the phrase is re-queued.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::EstimateError | Self::AudioRenderError)
    }

    /// No further work will happen without an external re-queue.
    pub fn is_settled(&self) -> bool {
        self.is_error() || *self == Self::Complete
    }

    /// Still waiting on (or running) estimation.
    pub fn is_estimate_stage(&self) -> bool {
        matches!(
            self,
            Self::WaitEstimate | Self::EstimateProcessing | Self::EstimateError
        )
    }

    /// Features exist and the phrase is somewhere in the render stage.
    pub fn is_render_stage(&self) -> bool {
        matches!(
            self,
            Self::WaitAudioRender | Self::AudioRenderProcessing | Self::AudioRenderError | Self::Complete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitEstimate => "wait_estimate",
            Self::EstimateProcessing => "estimate_processing",
            Self::EstimateError => "estimate_error",
            Self::WaitAudioRender => "wait_audio_render",
            Self::AudioRenderProcessing => "audio_render_processing",
            Self::AudioRenderError => "audio_render_error",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for PhraseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
