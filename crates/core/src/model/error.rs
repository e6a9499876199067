//! Error types for the track/phrase model.

use thiserror::Error;

use super::engine::EngineVersion;
use super::status::PhraseStatus;

/// Errors raised when mutating a track.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// No phrase with this number exists on the track.
    #[error("phrase {0} not found")]
    PhraseNotFound(usize),

    /// The requested status change is not an edge of the phrase state machine.
    #[error("invalid phrase transition: {from} -> {to}")]
    InvalidTransition { from: PhraseStatus, to: PhraseStatus },

    /// The feature sequences disagree on the number of frames.
    #[error("misaligned features: {f0} f0 frames, {spectral} spectral rows, {aperiodic} aperiodicity rows")]
    MisalignedFeatures {
        f0: usize,
        spectral: usize,
        aperiodic: usize,
    },

    /// Features of the wrong shape for the track's engine.
    #[error("features for phrase {no} do not match engine {engine}")]
    IncompatibleFeatures { no: usize, engine: EngineVersion },
}
