//! Synthesis engine variants.
//!
//! Each track is bound to one engine when it is created. The engine decides
//! the acoustic feature layout (spectral/aperiodic dimensions), frame period
//! and output sample rate, and selects which external executables a runner
//! invokes.

use serde::{Deserialize, Serialize};

/// Feature format / engine generation of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineVersion {
    /// First generation: 60-dim mel-cepstrum, 5-band aperiodicity.
    V1,
    /// Second generation: wider spectral envelope.
    #[default]
    V2,
}

impl EngineVersion {
    /// Frame period of the acoustic features in milliseconds.
    pub fn frame_period_ms(&self) -> u32 {
        5
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        48_000
    }

    /// Number of spectral envelope coefficients per frame.
    pub fn spectral_dims(&self) -> usize {
        match self {
            Self::V1 => 60,
            Self::V2 => 128,
        }
    }

    /// Number of aperiodicity bands per frame.
    pub fn aperiodic_dims(&self) -> usize {
        5
    }

    /// Converts a millisecond position into a feature frame index.
    pub fn ms_to_frame(&self, ms: u64) -> usize {
        (ms / u64::from(self.frame_period_ms())) as usize
    }

    /// Converts a millisecond position into a sample index.
    pub fn ms_to_sample(&self, ms: u64) -> usize {
        (ms * u64::from(self.sample_rate()) / 1000) as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

impl std::fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality/speed trade-off passed through to the external runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityMode {
    /// Fast preview quality, used while editing.
    Preview,
    /// Full quality.
    #[default]
    Standard,
    /// Slowest, highest quality.
    Elaborate,
}

impl QualityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Standard => "standard",
            Self::Elaborate => "elaborate",
        }
    }
}
