//! Request/response types exchanged with runners.

use serde::{Deserialize, Serialize};

use crate::model::{AcousticFeatures, EngineVersion, QualityMode, TimedPhoneme};

/// Pipeline stage a runner invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStage {
    Estimation,
    Render,
}

impl RunnerStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Estimation => "estimation",
            Self::Render => "render",
        }
    }
}

/// Input for acoustic feature estimation over a time range of a track.
#[derive(Debug, Clone)]
pub struct EstimationRequest {
    /// Unique job identifier (used for work files and progress).
    pub job_id: String,
    pub engine: EngineVersion,
    pub quality: QualityMode,
    /// Start of the estimated range in track time.
    pub begin_ms: u64,
    /// End of the estimated range in track time.
    pub end_ms: u64,
    /// Phonemes inside the range, in track time.
    pub phonemes: Vec<TimedPhoneme>,
    /// User-edited features guiding the estimate, aligned to `begin_ms`.
    pub guide: Option<AcousticFeatures>,
}

/// Input for rendering audio from acoustic features.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub job_id: String,
    pub engine: EngineVersion,
    pub quality: QualityMode,
    pub features: AcousticFeatures,
}

/// Progress line emitted by a running external process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerProgress {
    pub job_id: String,
    pub stage: RunnerStage,
    /// Raw output line.
    pub line: String,
    /// Completion percentage, when the line carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
}

/// Decodes signed 16-bit little-endian PCM; a trailing odd byte is ignored.
pub fn decode_pcm_s16le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encodes samples as signed 16-bit little-endian PCM.
pub fn encode_pcm_s16le(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
