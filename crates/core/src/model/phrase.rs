//! Phrase entity: one contiguous voiced segment of a track.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use super::engine::EngineVersion;
use super::features::AcousticFeatures;
use super::status::PhraseStatus;

/// A phoneme with absolute timing inside the track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedPhoneme {
    pub begin_ms: u64,
    pub end_ms: u64,
    pub label: String,
}

/// A contiguous voiced segment, the unit of estimation/render granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phrase {
    /// Index of the phrase within its track.
    pub no: usize,
    /// Start time in milliseconds from the start of the track.
    pub begin_ms: u64,
    /// End time in milliseconds (exclusive).
    pub end_ms: u64,
    pub phonemes: Vec<TimedPhoneme>,
    #[serde(default)]
    pub status: PhraseStatus,
    /// Features produced by the last successful estimation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub acoustic_features: Option<AcousticFeatures>,
    /// User-edited features (pitch/dynamics), preferred over estimated ones.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub edited_features: Option<AcousticFeatures>,
}

impl Phrase {
    pub fn new(no: usize, begin_ms: u64, end_ms: u64, phonemes: Vec<TimedPhoneme>) -> Self {
        Self {
            no,
            begin_ms,
            end_ms,
            phonemes,
            status: PhraseStatus::WaitEstimate,
            acoustic_features: None,
            edited_features: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.begin_ms)
    }

    /// Frame range of the phrase in track-absolute frames.
    pub fn frame_range(&self, engine: EngineVersion) -> Range<usize> {
        engine.ms_to_frame(self.begin_ms)..engine.ms_to_frame(self.end_ms)
    }

    /// Position of the phrase's first sample in the track waveform.
    pub fn sample_offset(&self, engine: EngineVersion) -> usize {
        engine.ms_to_sample(self.begin_ms)
    }

    /// Features to render: edits win over the estimate.
    pub fn render_features(&self) -> Option<&AcousticFeatures> {
        self.edited_features
            .as_ref()
            .or(self.acoustic_features.as_ref())
    }
}
