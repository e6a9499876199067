//! JSON project files.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use cantor_core::{EngineVersion, Phrase, TimedPhoneme, Track};

/// A project: the tracks to synthesize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub tracks: Vec<TrackFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackFile {
    pub name: String,
    #[serde(default)]
    pub engine: EngineVersion,
    pub phrases: Vec<PhraseFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhraseFile {
    pub begin_ms: u64,
    pub end_ms: u64,
    #[serde(default)]
    pub phonemes: Vec<TimedPhoneme>,
}

impl ProjectFile {
    /// Reads and checks a project file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project {:?}", path))?;
        let project: ProjectFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse project {:?}", path))?;
        project.validate()?;
        Ok(project)
    }

    fn validate(&self) -> Result<()> {
        if self.tracks.is_empty() {
            bail!("project has no tracks");
        }
        for track in &self.tracks {
            if track.name.trim().is_empty() {
                bail!("track name cannot be empty");
            }
            for (no, phrase) in track.phrases.iter().enumerate() {
                if phrase.end_ms <= phrase.begin_ms {
                    bail!(
                        "track {}: phrase {} ends at {} ms, before it begins at {} ms",
                        track.name,
                        no,
                        phrase.end_ms,
                        phrase.begin_ms
                    );
                }
            }
        }
        Ok(())
    }

    /// Builds the scheduler's tracks.
    pub fn into_tracks(self) -> Vec<Arc<Track>> {
        self.tracks
            .into_iter()
            .map(|track| {
                let phrases = track
                    .phrases
                    .into_iter()
                    .enumerate()
                    .map(|(no, p)| Phrase::new(no, p.begin_ms, p.end_ms, p.phonemes))
                    .collect();
                Arc::new(Track::new(track.name, track.engine, phrases))
            })
            .collect()
    }
}
