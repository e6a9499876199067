//! Acoustic feature buffers produced by estimation and consumed by rendering.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use super::engine::EngineVersion;
use super::error::ModelError;

/// Frame-aligned acoustic features: pitch, spectral envelope and aperiodicity.
///
/// All three sequences share the same frame count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcousticFeatures {
    /// Fundamental frequency per frame in Hz (0.0 = unvoiced).
    pub f0: Vec<f64>,
    /// Spectral envelope coefficients, one row per frame.
    pub spectral_envelope: Vec<Vec<f64>>,
    /// Band aperiodicity, one row per frame.
    pub aperiodicity: Vec<Vec<f64>>,
}

impl AcousticFeatures {
    /// Unvoiced, silent features for `frames` frames of the given engine.
    pub fn silent(engine: EngineVersion, frames: usize) -> Self {
        Self {
            f0: vec![0.0; frames],
            spectral_envelope: vec![vec![0.0; engine.spectral_dims()]; frames],
            aperiodicity: vec![vec![0.0; engine.aperiodic_dims()]; frames],
        }
    }

    pub fn frames(&self) -> usize {
        self.f0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.f0.is_empty()
    }

    /// Whether every sequence has the same length and the engine's row widths.
    pub fn is_consistent_with(&self, engine: EngineVersion) -> bool {
        let frames = self.frames();
        self.spectral_envelope.len() == frames
            && self.aperiodicity.len() == frames
            && self
                .spectral_envelope
                .iter()
                .all(|row| row.len() == engine.spectral_dims())
            && self
                .aperiodicity
                .iter()
                .all(|row| row.len() == engine.aperiodic_dims())
    }

    /// Copies out the frames in `range`, clamped to what is available.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.frames());
        let start = range.start.min(end);
        Self {
            f0: self.f0[start..end].to_vec(),
            spectral_envelope: self.spectral_envelope[start..end].to_vec(),
            aperiodicity: self.aperiodicity[start..end].to_vec(),
        }
    }

    /// Fails when the three sequences do not have the same frame count.
    pub fn check_aligned(&self) -> Result<(), ModelError> {
        let frames = self.frames();
        if self.spectral_envelope.len() == frames && self.aperiodicity.len() == frames {
            return Ok(());
        }
        Err(ModelError::MisalignedFeatures {
            f0: frames,
            spectral: self.spectral_envelope.len(),
            aperiodic: self.aperiodicity.len(),
        })
    }

    /// Overwrites frames starting at `offset` with `other`, growing as needed.
    ///
    /// Both buffers must be aligned; otherwise nothing is written.
    pub fn splice(&mut self, offset: usize, other: &AcousticFeatures) -> Result<(), ModelError> {
        self.check_aligned()?;
        other.check_aligned()?;

        let needed = offset + other.frames();
        if self.frames() < needed {
            let spectral_width = other.spectral_envelope.first().map_or(0, Vec::len);
            let aperiodic_width = other.aperiodicity.first().map_or(0, Vec::len);
            self.f0.resize(needed, 0.0);
            self.spectral_envelope
                .resize(needed, vec![0.0; spectral_width]);
            self.aperiodicity.resize(needed, vec![0.0; aperiodic_width]);
        }
        self.f0[offset..needed].copy_from_slice(&other.f0);
        self.spectral_envelope[offset..needed].clone_from_slice(&other.spectral_envelope);
        self.aperiodicity[offset..needed].clone_from_slice(&other.aperiodicity);
        Ok(())
    }
}
