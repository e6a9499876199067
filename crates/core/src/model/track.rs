//! Track: owner of phrases, the rendered waveform and change notifications.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::{broadcast, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

use super::engine::EngineVersion;
use super::error::ModelError;
use super::features::AcousticFeatures;
use super::phrase::Phrase;
use super::status::PhraseStatus;
use crate::metrics;

/// Track identifier.
pub type TrackId = Uuid;

/// Capacity of the per-track event channel.
const EVENT_BUFFER_SIZE: usize = 256;

/// Notifications delivered to observers (the editor) after track mutations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackEvent {
    /// A phrase moved to a new status.
    StatusChanged {
        track_id: TrackId,
        phrase_no: usize,
        from: PhraseStatus,
        to: PhraseStatus,
    },
    /// Statuses, features or audio changed; observers should repaint.
    FeaturesChanged { track_id: TrackId },
}

/// A vocal track made of phrases plus its shared waveform buffer.
///
/// Phrase-level fields are written by at most one worker at a time (the
/// session cancels older work before queueing newer work), so the locks here
/// only keep readers consistent. The render gate serialises whole-track
/// renders against phrase-level waveform writes.
#[derive(Debug)]
pub struct Track {
    id: TrackId,
    name: String,
    engine: EngineVersion,
    phrases: RwLock<Vec<Phrase>>,
    waveform: RwLock<Vec<i16>>,
    render_gate: RwLock<()>,
    busy: AtomicBool,
    events: broadcast::Sender<TrackEvent>,
}

/// Exclusive claim on a track's waveform for a whole-track render.
///
/// The track reports itself busy until the guard is dropped.
pub struct ExclusiveRender<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
    busy: &'a AtomicBool,
}

impl Drop for ExclusiveRender<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl Track {
    /// Creates a track; phrases are renumbered to their position.
    pub fn new(name: impl Into<String>, engine: EngineVersion, mut phrases: Vec<Phrase>) -> Self {
        phrases.sort_by_key(|p| p.begin_ms);
        for (idx, phrase) in phrases.iter_mut().enumerate() {
            phrase.no = idx;
        }
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            engine,
            phrases: RwLock::new(phrases),
            waveform: RwLock::new(Vec::new()),
            render_gate: RwLock::new(()),
            busy: AtomicBool::new(false),
            events,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> EngineVersion {
        self.engine
    }

    /// Subscribe to status/feature change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackEvent> {
        self.events.subscribe()
    }

    /// Tells observers that statuses or features changed.
    pub fn raise_feature_changed(&self) {
        // No subscribers is fine.
        let _ = self.events.send(TrackEvent::FeaturesChanged { track_id: self.id });
    }

    /// Snapshot of all phrases in order.
    pub async fn phrases(&self) -> Vec<Phrase> {
        self.phrases.read().await.clone()
    }

    pub async fn phrase(&self, no: usize) -> Option<Phrase> {
        self.phrases.read().await.get(no).cloned()
    }

    pub async fn phrase_count(&self) -> usize {
        self.phrases.read().await.len()
    }

    pub async fn phrase_nos(&self) -> Vec<usize> {
        self.phrases.read().await.iter().map(|p| p.no).collect()
    }

    pub async fn status(&self, no: usize) -> Option<PhraseStatus> {
        self.phrases.read().await.get(no).map(|p| p.status)
    }

    pub async fn statuses(&self) -> Vec<PhraseStatus> {
        self.phrases.read().await.iter().map(|p| p.status).collect()
    }

    /// Moves one phrase to `status`, returning the previous status.
    pub async fn set_status(&self, no: usize, status: PhraseStatus) -> Result<PhraseStatus, ModelError> {
        self.set_statuses(&[no], status)
            .await
            .map(|previous| previous[0])
    }

    /// Moves every listed phrase to `status`.
    ///
    /// All transitions are validated before any is applied, so either every
    /// phrase moves or none does.
    pub async fn set_statuses(
        &self,
        nos: &[usize],
        status: PhraseStatus,
    ) -> Result<Vec<PhraseStatus>, ModelError> {
        let mut phrases = self.phrases.write().await;

        let mut previous = Vec::with_capacity(nos.len());
        for &no in nos {
            let phrase = phrases.get(no).ok_or(ModelError::PhraseNotFound(no))?;
            if !phrase.status.can_transition_to(status) {
                return Err(ModelError::InvalidTransition {
                    from: phrase.status,
                    to: status,
                });
            }
            previous.push(phrase.status);
        }

        for (&no, &from) in nos.iter().zip(&previous) {
            phrases[no].status = status;
            metrics::PHRASE_TRANSITIONS
                .with_label_values(&[status.as_str()])
                .inc();
            debug!(track = %self.name, phrase = no, %from, to = %status, "Phrase status changed");
            let _ = self.events.send(TrackEvent::StatusChanged {
                track_id: self.id,
                phrase_no: no,
                from,
                to: status,
            });
        }

        Ok(previous)
    }

    /// Stores freshly estimated features for a phrase.
    pub async fn set_acoustic_features(
        &self,
        no: usize,
        features: AcousticFeatures,
    ) -> Result<(), ModelError> {
        let mut phrases = self.phrases.write().await;
        let phrase = phrases.get_mut(no).ok_or(ModelError::PhraseNotFound(no))?;
        phrase.acoustic_features = Some(features);
        Ok(())
    }

    /// Replaces (or clears) the user-edited features of a phrase.
    ///
    /// Features must be aligned and shaped for the track's engine.
    pub async fn set_edited_features(
        &self,
        no: usize,
        features: Option<AcousticFeatures>,
    ) -> Result<(), ModelError> {
        if let Some(features) = &features {
            if !features.is_consistent_with(self.engine) {
                return Err(ModelError::IncompatibleFeatures {
                    no,
                    engine: self.engine,
                });
            }
        }
        let mut phrases = self.phrases.write().await;
        let phrase = phrases.get_mut(no).ok_or(ModelError::PhraseNotFound(no))?;
        phrase.edited_features = features;
        Ok(())
    }

    /// Length of the track in feature frames (end of the last phrase).
    pub async fn total_frames_count(&self) -> usize {
        let phrases = self.phrases.read().await;
        phrases
            .iter()
            .map(|p| self.engine.ms_to_frame(p.end_ms))
            .max()
            .unwrap_or(0)
    }

    /// Copy of the rendered waveform.
    pub async fn waveform(&self) -> Vec<i16> {
        self.waveform.read().await.clone()
    }

    /// Writes samples at `offset`, growing the buffer with silence if needed.
    pub async fn write_waveform(&self, offset: usize, samples: &[i16]) {
        let mut waveform = self.waveform.write().await;
        let end = offset + samples.len();
        if waveform.len() < end {
            waveform.resize(end, 0);
        }
        waveform[offset..end].copy_from_slice(samples);
    }

    /// Replaces the whole waveform, dropping anything past the new end.
    pub async fn replace_waveform(&self, samples: &[i16]) {
        let mut waveform = self.waveform.write().await;
        waveform.clear();
        waveform.extend_from_slice(samples);
    }

    /// Claims the waveform for a whole-track render and marks the track busy.
    pub async fn lock_exclusive_render(&self) -> ExclusiveRender<'_> {
        let guard = self.render_gate.write().await;
        self.busy.store(true, Ordering::SeqCst);
        ExclusiveRender {
            _guard: guard,
            busy: &self.busy,
        }
    }

    /// Shared claim for a phrase-level waveform write.
    pub async fn lock_shared_render(&self) -> RwLockReadGuard<'_, ()> {
        self.render_gate.read().await
    }

    /// Whether a whole-track render currently owns the waveform.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}
