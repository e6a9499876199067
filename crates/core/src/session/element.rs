//! Work items scheduled by a project session.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{QualityMode, Track, TrackId};
use crate::queue::{PriorityClass, QueueTask};

/// One unit of estimation or render work: a whole track or a single phrase.
///
/// The description is immutable; the run state is the start timestamp (set
/// once a worker picks the item up) and the cancellation token, which the
/// element owns and which may be cancelled any number of times.
#[derive(Debug)]
pub struct QueueElement {
    id: Uuid,
    track: Arc<Track>,
    phrase: Option<usize>,
    quality: QualityMode,
    priority_class: PriorityClass,
    cancel: CancellationToken,
    created_at: DateTime<Utc>,
    started_at: OnceLock<DateTime<Utc>>,
}

impl QueueElement {
    /// Creates an element with its own cancellation token.
    pub fn new(
        track: Arc<Track>,
        phrase: Option<usize>,
        quality: QualityMode,
        priority_class: PriorityClass,
    ) -> Self {
        Self::with_token(track, phrase, quality, priority_class, CancellationToken::new())
    }

    /// Creates follow-up work for `phrase`, cancelled whenever `self` is.
    pub fn derive(&self, phrase: Option<usize>) -> Self {
        Self::with_token(
            Arc::clone(&self.track),
            phrase,
            self.quality,
            self.priority_class,
            self.cancel.child_token(),
        )
    }

    fn with_token(
        track: Arc<Track>,
        phrase: Option<usize>,
        quality: QualityMode,
        priority_class: PriorityClass,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            track,
            phrase,
            quality,
            priority_class,
            cancel,
            created_at: Utc::now(),
            started_at: OnceLock::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn track(&self) -> &Arc<Track> {
        &self.track
    }

    pub fn track_id(&self) -> TrackId {
        self.track.id()
    }

    /// The phrase this item covers; `None` means the whole track.
    pub fn phrase(&self) -> Option<usize> {
        self.phrase
    }

    pub fn is_whole_track(&self) -> bool {
        self.phrase.is_none()
    }

    pub fn quality(&self) -> QualityMode {
        self.quality
    }

    pub fn priority_class(&self) -> PriorityClass {
        self.priority_class
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When a worker started running this item.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.get().copied()
    }

    /// Not yet started and not cancelled.
    pub fn is_runnable(&self) -> bool {
        self.started_at.get().is_none() && !self.cancel.is_cancelled()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether this item's work touches `phrase` of `track`.
    pub fn covers_phrase(&self, track: TrackId, phrase: usize) -> bool {
        self.track.id() == track && self.phrase.map_or(true, |no| no == phrase)
    }

    pub fn belongs_to(&self, track: TrackId) -> bool {
        self.track.id() == track
    }
}

impl QueueTask for QueueElement {
    fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn mark_started(&self) {
        let _ = self.started_at.set(Utc::now());
    }

    fn label(&self) -> String {
        match self.phrase {
            Some(no) => format!("{}#{}", self.track.name(), no),
            None => format!("{}#*", self.track.name()),
        }
    }
}
