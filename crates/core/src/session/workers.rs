//! Worker bodies of the estimation and render queues.

use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::element::QueueElement;
use super::project::{waiting_status, SessionShared};
use crate::metrics;
use crate::model::{AcousticFeatures, EngineVersion, ModelError, Phrase, PhraseStatus};
use crate::queue::{QueueTask, QueueWorker};
use crate::runner::{
    decode_pcm_s16le, EstimationRequest, RenderRequest, RunnerError, RunnerStage,
};

/// Runs estimation items.
pub(super) struct EstimationWorker {
    session: Weak<SessionShared>,
}

impl EstimationWorker {
    pub(super) fn new(session: Weak<SessionShared>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl QueueWorker<QueueElement> for EstimationWorker {
    async fn run(&self, element: Arc<QueueElement>) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        session.run_estimation(element).await;
    }
}

/// Runs render items.
pub(super) struct RenderWorker {
    session: Weak<SessionShared>,
}

impl RenderWorker {
    pub(super) fn new(session: Weak<SessionShared>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl QueueWorker<QueueElement> for RenderWorker {
    async fn run(&self, element: Arc<QueueElement>) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        session.run_render(element).await;
    }
}

/// Time range and phrases an item works on.
struct Scope {
    nos: Vec<usize>,
    begin_ms: u64,
    end_ms: u64,
}

impl Scope {
    fn of(element: &QueueElement, phrases: &[Phrase]) -> Option<Self> {
        match element.phrase() {
            Some(no) => phrases.get(no).map(|phrase| Self {
                nos: vec![no],
                begin_ms: phrase.begin_ms,
                end_ms: phrase.end_ms,
            }),
            None if phrases.is_empty() => None,
            None => Some(Self {
                nos: phrases.iter().map(|p| p.no).collect(),
                begin_ms: 0,
                end_ms: phrases.iter().map(|p| p.end_ms).max().unwrap_or(0),
            }),
        }
    }

    fn phrases<'a>(&'a self, phrases: &'a [Phrase]) -> impl Iterator<Item = &'a Phrase> + 'a {
        self.nos.iter().filter_map(|&no| phrases.get(no))
    }

    /// First feature frame of the scope in track frames.
    fn base_frame(&self, engine: EngineVersion) -> usize {
        engine.ms_to_frame(self.begin_ms)
    }

    fn frames(&self, engine: EngineVersion) -> usize {
        engine
            .ms_to_frame(self.end_ms)
            .saturating_sub(self.base_frame(engine))
    }
}

fn record_run<T>(stage: RunnerStage, result: &Result<T, RunnerError>, started: Instant) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) if e.is_cancelled() => "cancelled",
        Err(_) => "failed",
    };
    metrics::RUNNER_DURATION
        .with_label_values(&[stage.as_str(), outcome])
        .observe(started.elapsed().as_secs_f64());
}

impl SessionShared {
    /// Marks the scope as running `stage`; `None` when the item should not run.
    async fn start(&self, stage: RunnerStage, element: &QueueElement) -> Option<(Scope, Vec<Phrase>)> {
        if !self.is_active() || element.is_cancellation_requested() {
            debug!(task = %element.label(), stage = stage.as_str(), "Skipping inactive item");
            return None;
        }

        let track = element.track();
        let phrases = track.phrases().await;
        let Some(scope) = Scope::of(element, &phrases) else {
            warn!(task = %element.label(), "Item refers to no phrases");
            return None;
        };

        let processing = match stage {
            RunnerStage::Estimation => PhraseStatus::EstimateProcessing,
            RunnerStage::Render => PhraseStatus::AudioRenderProcessing,
        };
        if let Err(e) = track.set_statuses(&scope.nos, processing).await {
            warn!(task = %element.label(), stage = stage.as_str(), "Not starting: {}", e);
            return None;
        }
        track.raise_feature_changed();

        Some((scope, phrases))
    }

    pub(super) async fn run_estimation(&self, element: Arc<QueueElement>) {
        let Some((scope, phrases)) = self.start(RunnerStage::Estimation, &element).await else {
            return;
        };
        let engine = element.track().engine();

        let guide = match edited_guide(&scope, &phrases, engine) {
            Ok(guide) => guide,
            Err(e) => {
                let error = RunnerError::InvalidRequest {
                    reason: format!("edited features: {}", e),
                };
                self.fail(RunnerStage::Estimation, &element, &scope, &error)
                    .await;
                return;
            }
        };

        let request = EstimationRequest {
            job_id: element.id().to_string(),
            engine,
            quality: element.quality(),
            begin_ms: scope.begin_ms,
            end_ms: scope.end_ms,
            phonemes: scope
                .phrases(&phrases)
                .flat_map(|p| p.phonemes.iter().cloned())
                .collect(),
            guide,
        };

        debug!(task = %element.label(), "Running estimation");
        let started = Instant::now();
        let result = self
            .runner
            .estimate(request, element.cancellation().clone(), self.progress.clone())
            .await;
        record_run(RunnerStage::Estimation, &result, started);

        match result {
            Ok(_) if element.is_cancellation_requested() => {
                debug!(task = %element.label(), "Discarding estimate of cancelled item");
            }
            Ok(features) if !features.is_consistent_with(engine) => {
                let error = RunnerError::invalid_output(format!(
                    "features do not match engine {}",
                    engine
                ));
                self.fail(RunnerStage::Estimation, &element, &scope, &error)
                    .await;
            }
            Ok(features) => {
                self.apply_estimation(&element, &scope, &phrases, features)
                    .await;
            }
            Err(e) if e.is_cancelled() || element.is_cancellation_requested() => {
                debug!(task = %element.label(), "Estimation cancelled");
            }
            Err(e) => {
                self.fail(RunnerStage::Estimation, &element, &scope, &e)
                    .await;
            }
        }
    }

    /// Stores per-phrase slices of the estimate and hands the scope to the
    /// render queue.
    async fn apply_estimation(
        &self,
        element: &QueueElement,
        scope: &Scope,
        phrases: &[Phrase],
        features: AcousticFeatures,
    ) {
        let track = element.track();
        let engine = track.engine();
        let base = scope.base_frame(engine);

        for phrase in scope.phrases(phrases) {
            let range = phrase.frame_range(engine);
            let slice = features.slice(range.start.saturating_sub(base)..range.end.saturating_sub(base));
            if let Err(e) = track.set_acoustic_features(phrase.no, slice).await {
                warn!(task = %element.label(), "Failed to store features: {}", e);
            }
        }

        if let Err(e) = track
            .set_statuses(&scope.nos, PhraseStatus::WaitAudioRender)
            .await
        {
            warn!(task = %element.label(), "Failed to finish estimation: {}", e);
            return;
        }
        track.raise_feature_changed();
        info!(task = %element.label(), frames = features.frames(), "Estimation finished");

        if !self.is_active() {
            return;
        }
        let follow_up = Arc::new(element.derive(element.phrase()));
        let priority = self
            .render
            .enqueue_with_class(Arc::clone(&follow_up), element.priority_class());
        debug!(task = %follow_up.label(), priority, "Queued render after estimation");
    }

    pub(super) async fn run_render(&self, element: Arc<QueueElement>) {
        let track = Arc::clone(element.track());
        // A whole-track render owns the waveform from start to finish.
        let _exclusive = if element.is_whole_track() {
            Some(track.lock_exclusive_render().await)
        } else {
            None
        };

        let Some((scope, phrases)) = self.start(RunnerStage::Render, &element).await else {
            return;
        };
        let engine = track.engine();

        let features = match element.phrase() {
            None => match track_features(&phrases, engine, track.total_frames_count().await) {
                Ok(features) => features,
                Err(e) => {
                    let error = RunnerError::InvalidRequest {
                        reason: format!("track features: {}", e),
                    };
                    self.fail(RunnerStage::Render, &element, &scope, &error)
                        .await;
                    return;
                }
            },
            Some(no) => match phrases.get(no).and_then(Phrase::render_features) {
                Some(features) => features.clone(),
                None => {
                    let error = RunnerError::InvalidRequest {
                        reason: format!("phrase {} has no acoustic features", no),
                    };
                    self.fail(RunnerStage::Render, &element, &scope, &error)
                        .await;
                    return;
                }
            },
        };

        let request = RenderRequest {
            job_id: element.id().to_string(),
            engine,
            quality: element.quality(),
            features,
        };

        debug!(task = %element.label(), "Running render");
        let started = Instant::now();
        let result = self
            .runner
            .render(request, element.cancellation().clone(), self.progress.clone())
            .await;
        record_run(RunnerStage::Render, &result, started);

        match result {
            Ok(_) if element.is_cancellation_requested() => {
                debug!(task = %element.label(), "Discarding render of cancelled item");
            }
            Ok(pcm) => {
                let samples = decode_pcm_s16le(&pcm);
                match element.phrase() {
                    None => track.replace_waveform(&samples).await,
                    Some(no) => {
                        let offset = phrases
                            .get(no)
                            .map(|p| p.sample_offset(engine))
                            .unwrap_or(0);
                        let _shared = track.lock_shared_render().await;
                        track.write_waveform(offset, &samples).await;
                    }
                }

                if let Err(e) = track.set_statuses(&scope.nos, PhraseStatus::Complete).await {
                    warn!(task = %element.label(), "Failed to finish render: {}", e);
                    return;
                }
                track.raise_feature_changed();
                info!(task = %element.label(), samples = samples.len(), "Render finished");
            }
            Err(e) if e.is_cancelled() || element.is_cancellation_requested() => {
                debug!(task = %element.label(), "Render cancelled");
            }
            Err(e) => {
                self.fail(RunnerStage::Render, &element, &scope, &e).await;
            }
        }
    }

    /// Marks the scope as failed; a whole-track failure is retried phrase by
    /// phrase so one bad phrase does not hold back the rest.
    async fn fail(
        &self,
        stage: RunnerStage,
        element: &QueueElement,
        scope: &Scope,
        error: &RunnerError,
    ) {
        warn!(task = %element.label(), stage = stage.as_str(), "Run failed: {}", error);

        let error_status = match stage {
            RunnerStage::Estimation => PhraseStatus::EstimateError,
            RunnerStage::Render => PhraseStatus::AudioRenderError,
        };
        let track = element.track();
        if let Err(e) = track.set_statuses(&scope.nos, error_status).await {
            warn!(task = %element.label(), "Failed to record error status: {}", e);
        }
        track.raise_feature_changed();

        if !element.is_whole_track() || !self.is_active() || element.is_cancellation_requested() {
            return;
        }

        info!(
            task = %element.label(),
            stage = stage.as_str(),
            phrases = scope.nos.len(),
            "Retrying whole-track failure phrase by phrase"
        );
        let queue = self.queue(stage);
        for &no in &scope.nos {
            if let Err(e) = track.set_status(no, waiting_status(stage)).await {
                warn!(task = %element.label(), phrase = no, "Not retrying phrase: {}", e);
                continue;
            }
            let retry = Arc::new(element.derive(Some(no)));
            queue.enqueue_with_class(retry, element.priority_class());
        }
        track.raise_feature_changed();
    }
}

/// Every phrase's render features laid out over a silent track.
fn track_features(
    phrases: &[Phrase],
    engine: EngineVersion,
    frames: usize,
) -> Result<AcousticFeatures, ModelError> {
    let mut features = AcousticFeatures::silent(engine, frames);
    for phrase in phrases {
        if let Some(phrase_features) = phrase.render_features() {
            features.splice(phrase.frame_range(engine).start, phrase_features)?;
        }
    }
    Ok(features)
}

/// User edits inside the scope, laid out on the scope's frame grid.
fn edited_guide(
    scope: &Scope,
    phrases: &[Phrase],
    engine: EngineVersion,
) -> Result<Option<AcousticFeatures>, ModelError> {
    let edited: Vec<&Phrase> = scope
        .phrases(phrases)
        .filter(|p| p.edited_features.is_some())
        .collect();
    if edited.is_empty() {
        return Ok(None);
    }

    let base = scope.base_frame(engine);
    let mut guide = AcousticFeatures::silent(engine, scope.frames(engine));
    for phrase in edited {
        if let Some(features) = &phrase.edited_features {
            guide.splice(phrase.frame_range(engine).start.saturating_sub(base), features)?;
        }
    }
    Ok(Some(guide))
}
