//! Project session: owns the estimation and render queues of a project.
//!
//! Every public enqueue first cancels the older work for the same
//! (track, phrase) keys and waits for it to stop, so at most one live item
//! per phrase can mutate that phrase. When the cancelled work was a
//! whole-track item, the phrases it covered but the new request does not are
//! queued again one by one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::element::QueueElement;
use super::types::{SessionState, SessionStatus};
use super::workers::{EstimationWorker, RenderWorker};
use crate::model::{PhraseStatus, QualityMode, Track};
use crate::queue::{PriorityClass, PriorityTaskQueue, QueueTask};
use crate::runner::{RunnerProgress, RunnerStage, SynthesisRunner};

/// State shared between the session handle and its worker bodies.
pub(super) struct SessionShared {
    state: Mutex<SessionState>,
    pub(super) quality: QualityMode,
    pub(super) runner: Arc<dyn SynthesisRunner>,
    pub(super) progress: Option<mpsc::Sender<RunnerProgress>>,
    pub(super) estimation: PriorityTaskQueue<QueueElement>,
    pub(super) render: PriorityTaskQueue<QueueElement>,
}

impl SessionShared {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub(super) fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub(super) fn queue(&self, stage: RunnerStage) -> &PriorityTaskQueue<QueueElement> {
        match stage {
            RunnerStage::Estimation => &self.estimation,
            RunnerStage::Render => &self.render,
        }
    }
}

/// Status a phrase waits in before running `stage`.
pub(super) fn waiting_status(stage: RunnerStage) -> PhraseStatus {
    match stage {
        RunnerStage::Estimation => PhraseStatus::WaitEstimate,
        RunnerStage::Render => PhraseStatus::WaitAudioRender,
    }
}

/// Whether a phrase in `status` can be queued for `stage`.
fn accepts(stage: RunnerStage, status: PhraseStatus) -> bool {
    match stage {
        RunnerStage::Estimation => true,
        RunnerStage::Render => status.is_render_stage(),
    }
}

/// Pipeline orchestrator of one project.
///
/// Owns one [`PriorityTaskQueue`] per stage. A successful estimation hands
/// its scope to the render queue; a failed whole-track run is retried phrase
/// by phrase. Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct ProjectSession {
    shared: Arc<SessionShared>,
}

impl ProjectSession {
    /// Creates an idle session.
    pub fn new(config: SessionConfig, runner: Arc<dyn SynthesisRunner>) -> Self {
        Self::build(config, runner, None)
    }

    /// Creates an idle session that forwards runner progress to `progress`.
    pub fn with_progress(
        config: SessionConfig,
        runner: Arc<dyn SynthesisRunner>,
        progress: mpsc::Sender<RunnerProgress>,
    ) -> Self {
        Self::build(config, runner, Some(progress))
    }

    fn build(
        config: SessionConfig,
        runner: Arc<dyn SynthesisRunner>,
        progress: Option<mpsc::Sender<RunnerProgress>>,
    ) -> Self {
        let shared = Arc::new_cyclic(|session: &Weak<SessionShared>| SessionShared {
            state: Mutex::new(SessionState::Idle),
            quality: config.quality,
            runner,
            progress,
            estimation: PriorityTaskQueue::new(
                RunnerStage::Estimation.as_str(),
                config.estimation_concurrency,
                Arc::new(EstimationWorker::new(session.clone())),
            ),
            render: PriorityTaskQueue::new(
                RunnerStage::Render.as_str(),
                config.render_concurrency,
                Arc::new(RenderWorker::new(session.clone())),
            ),
        });

        Self { shared }
    }

    /// Starts dispatching queued work.
    pub fn begin(&self) {
        {
            let mut state = self.shared.lock_state();
            match *state {
                SessionState::Active => return,
                SessionState::Ended => {
                    warn!("Cannot begin a session that has ended");
                    return;
                }
                SessionState::Idle => *state = SessionState::Active,
            }
        }

        info!(runner = self.shared.runner.name(), "Project session started");
        self.shared.estimation.begin_session();
        self.shared.render.begin_session();
    }

    /// Ends the session: cancels all work in both queues and waits for it.
    ///
    /// Later enqueues are ignored.
    pub async fn end(&self) {
        {
            let mut state = self.shared.lock_state();
            if *state == SessionState::Ended {
                return;
            }
            *state = SessionState::Ended;
        }

        info!("Ending project session");
        futures::join!(
            self.shared.estimation.end_session(),
            self.shared.render.end_session()
        );
        info!("Project session ended");
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Get current session status.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.shared.state(),
            estimation: self.shared.estimation.status(),
            render: self.shared.render.status(),
        }
    }

    /// No work queued or running in either queue.
    pub fn is_idle(&self) -> bool {
        self.shared.estimation.is_empty() && self.shared.render.is_empty()
    }

    /// Waits until both queues are empty, including follow-up renders and
    /// per-phrase retries queued by running work.
    ///
    /// Statuses alone do not mean the session is done: a failed whole-track
    /// item reports `*Error` for every phrase before queueing the retries.
    pub async fn wait_idle(&self) {
        loop {
            futures::join!(
                self.shared.estimation.wait_idle(),
                self.shared.render.wait_idle()
            );
            if self.is_idle() {
                return;
            }
        }
    }

    // =========================================================================
    // Estimation
    // =========================================================================

    /// Queues estimation of the whole track.
    pub async fn enqueue_estimate_track(
        &self,
        track: &Arc<Track>,
        class: PriorityClass,
    ) -> Option<Arc<QueueElement>> {
        self.enqueue_track(RunnerStage::Estimation, track, class).await
    }

    /// Queues estimation of one phrase.
    pub async fn enqueue_estimate_phrase(
        &self,
        track: &Arc<Track>,
        phrase: usize,
        class: PriorityClass,
    ) -> Option<Arc<QueueElement>> {
        self.enqueue_phrases(RunnerStage::Estimation, track, &[phrase], class)
            .await
            .pop()
    }

    /// Queues estimation of several phrases, one item per phrase.
    pub async fn enqueue_estimate_phrases(
        &self,
        track: &Arc<Track>,
        phrases: &[usize],
        class: PriorityClass,
    ) -> Vec<Arc<QueueElement>> {
        self.enqueue_phrases(RunnerStage::Estimation, track, phrases, class)
            .await
    }

    // =========================================================================
    // Render
    // =========================================================================

    /// Queues rendering of the whole track.
    ///
    /// Every phrase must already have features; otherwise nothing is
    /// cancelled or queued and the pending estimations hand over rendering.
    pub async fn enqueue_render_track(
        &self,
        track: &Arc<Track>,
        class: PriorityClass,
    ) -> Option<Arc<QueueElement>> {
        self.enqueue_track(RunnerStage::Render, track, class).await
    }

    /// Queues rendering of one phrase.
    pub async fn enqueue_render_phrase(
        &self,
        track: &Arc<Track>,
        phrase: usize,
        class: PriorityClass,
    ) -> Option<Arc<QueueElement>> {
        self.enqueue_phrases(RunnerStage::Render, track, &[phrase], class)
            .await
            .pop()
    }

    /// Queues rendering of several phrases; phrases still waiting on
    /// estimation are skipped.
    pub async fn enqueue_render_phrases(
        &self,
        track: &Arc<Track>,
        phrases: &[usize],
        class: PriorityClass,
    ) -> Vec<Arc<QueueElement>> {
        self.enqueue_phrases(RunnerStage::Render, track, phrases, class)
            .await
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancels work touching `phrase` in both queues and waits for it.
    ///
    /// Returns the number of items cancelled.
    pub async fn cancel_for_phrase(&self, track: &Track, phrase: usize) -> usize {
        self.cancel_for_phrases(track, &[phrase]).await
    }

    pub async fn cancel_for_phrases(&self, track: &Track, phrases: &[usize]) -> usize {
        let track_id = track.id();
        let (estimation, render) = self
            .cancel_in_both(|element| {
                phrases
                    .iter()
                    .any(|&no| element.covers_phrase(track_id, no))
            })
            .await;
        estimation.len() + render.len()
    }

    pub async fn cancel_all_for_track(&self, track: &Track) -> usize {
        let track_id = track.id();
        let (estimation, render) = self
            .cancel_in_both(|element| element.belongs_to(track_id))
            .await;
        estimation.len() + render.len()
    }

    pub async fn cancel_all(&self) -> usize {
        let (estimation, render) = self.cancel_in_both(|_| true).await;
        estimation.len() + render.len()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn is_ended(&self) -> bool {
        self.shared.state() == SessionState::Ended
    }

    /// Cancels matching items in both queues concurrently.
    async fn cancel_in_both<F>(&self, predicate: F) -> (Vec<Arc<QueueElement>>, Vec<Arc<QueueElement>>)
    where
        F: Fn(&QueueElement) -> bool + Send + Sync,
    {
        futures::join!(
            self.shared.estimation.cancel(&predicate),
            self.shared.render.cancel(&predicate)
        )
    }

    async fn enqueue_track(
        &self,
        stage: RunnerStage,
        track: &Arc<Track>,
        class: PriorityClass,
    ) -> Option<Arc<QueueElement>> {
        if self.is_ended() {
            debug!(track = %track.name(), "Session ended; ignoring enqueue");
            return None;
        }

        let statuses = track.statuses().await;
        if statuses.is_empty() {
            return None;
        }
        if !statuses.iter().all(|&status| accepts(stage, status)) {
            debug!(
                track = %track.name(),
                stage = stage.as_str(),
                "Track is not ready for this stage; skipping"
            );
            return None;
        }

        let track_id = track.id();
        match stage {
            RunnerStage::Estimation => {
                self.cancel_in_both(|element| element.belongs_to(track_id))
                    .await;
            }
            RunnerStage::Render => {
                self.shared
                    .render
                    .cancel(|element| element.belongs_to(track_id))
                    .await;
            }
        }

        let nos: Vec<usize> = (0..statuses.len()).collect();
        if let Err(e) = track.set_statuses(&nos, waiting_status(stage)).await {
            warn!(track = %track.name(), "Failed to reset phrase statuses: {}", e);
            return None;
        }
        track.raise_feature_changed();

        let element = Arc::new(QueueElement::new(
            Arc::clone(track),
            None,
            self.shared.quality,
            class,
        ));
        let priority = self
            .shared
            .queue(stage)
            .enqueue_with_class(Arc::clone(&element), class);
        debug!(
            task = %element.label(),
            stage = stage.as_str(),
            priority,
            "Queued whole-track work"
        );

        Some(element)
    }

    async fn enqueue_phrases(
        &self,
        stage: RunnerStage,
        track: &Arc<Track>,
        phrases: &[usize],
        class: PriorityClass,
    ) -> Vec<Arc<QueueElement>> {
        if self.is_ended() {
            debug!(track = %track.name(), "Session ended; ignoring enqueue");
            return Vec::new();
        }

        let statuses = track.statuses().await;
        let mut targets: Vec<usize> = Vec::with_capacity(phrases.len());
        for &no in phrases {
            match statuses.get(no) {
                None => warn!(track = %track.name(), phrase = no, "Unknown phrase; skipping"),
                Some(&status) if !accepts(stage, status) => debug!(
                    track = %track.name(),
                    phrase = no,
                    %status,
                    stage = stage.as_str(),
                    "Phrase is not ready for this stage; skipping"
                ),
                Some(_) if targets.contains(&no) => {}
                Some(_) => targets.push(no),
            }
        }
        if targets.is_empty() {
            return Vec::new();
        }

        let track_id = track.id();
        let covers = |element: &QueueElement| {
            targets
                .iter()
                .any(|&no| element.covers_phrase(track_id, no))
        };
        let (displaced_estimation, displaced_render) = match stage {
            RunnerStage::Estimation => self.cancel_in_both(covers).await,
            RunnerStage::Render => (Vec::new(), self.shared.render.cancel(covers).await),
        };
        self.recover_displaced(track, &targets, &displaced_estimation, &displaced_render)
            .await;

        if let Err(e) = track.set_statuses(&targets, waiting_status(stage)).await {
            warn!(track = %track.name(), "Failed to reset phrase statuses: {}", e);
            return Vec::new();
        }
        track.raise_feature_changed();

        self.push_phrases(stage, track, &targets, self.shared.quality, class)
    }

    /// Re-queues phrases that a cancelled whole-track item covered but the
    /// new request does not.
    async fn recover_displaced(
        &self,
        track: &Arc<Track>,
        requested: &[usize],
        estimation: &[Arc<QueueElement>],
        render: &[Arc<QueueElement>],
    ) {
        for (stage, cancelled) in [
            (RunnerStage::Estimation, estimation),
            (RunnerStage::Render, render),
        ] {
            let Some(displaced) = cancelled.iter().find(|e| e.is_whole_track()) else {
                continue;
            };

            // Read after the estimation pass so phrases it just re-queued
            // are not also queued for rendering.
            let statuses = track.statuses().await;
            let uncovered: Vec<usize> = statuses
                .iter()
                .enumerate()
                .filter(|(no, _)| !requested.contains(no))
                .filter(|(_, status)| match stage {
                    RunnerStage::Estimation => true,
                    RunnerStage::Render => matches!(
                        status,
                        PhraseStatus::WaitAudioRender | PhraseStatus::AudioRenderProcessing
                    ),
                })
                .map(|(no, _)| no)
                .collect();
            if uncovered.is_empty() {
                continue;
            }

            info!(
                task = %displaced.label(),
                stage = stage.as_str(),
                phrases = ?uncovered,
                "Re-queueing phrases displaced from a cancelled whole-track item"
            );
            if let Err(e) = track.set_statuses(&uncovered, waiting_status(stage)).await {
                warn!(track = %track.name(), "Failed to reset displaced phrases: {}", e);
                continue;
            }
            self.push_phrases(
                stage,
                track,
                &uncovered,
                displaced.quality(),
                displaced.priority_class(),
            );
        }
    }

    fn push_phrases(
        &self,
        stage: RunnerStage,
        track: &Arc<Track>,
        phrases: &[usize],
        quality: QualityMode,
        class: PriorityClass,
    ) -> Vec<Arc<QueueElement>> {
        let queue = self.shared.queue(stage);
        phrases
            .iter()
            .map(|&no| {
                let element = Arc::new(QueueElement::new(Arc::clone(track), Some(no), quality, class));
                let priority = queue.enqueue_with_class(Arc::clone(&element), class);
                debug!(
                    task = %element.label(),
                    stage = stage.as_str(),
                    priority,
                    "Queued phrase work"
                );
                element
            })
            .collect()
    }
}
