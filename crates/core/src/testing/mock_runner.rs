//! Mock synthesis runner for testing.

use async_trait::async_trait;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::model::{AcousticFeatures, EngineVersion};
use crate::runner::{
    encode_pcm_s16le, EstimationRequest, RenderRequest, RunnerError, RunnerProgress, RunnerStage,
    SynthesisRunner,
};

/// Sample value written by mock renders.
pub const MOCK_SAMPLE: i16 = 1000;

/// How a recorded run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failed,
    Cancelled,
}

/// A recorded runner invocation for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub stage: RunnerStage,
    /// Job id of the request (the work item's id).
    pub job_id: String,
    /// Requested time range (estimation only).
    pub range_ms: Option<Range<u64>>,
    /// Frames estimated or rendered.
    pub frames: usize,
    /// Value the run wrote into every f0 frame (estimation only).
    pub marker: f64,
    pub outcome: RunOutcome,
}

/// Mock implementation of the SynthesisRunner trait.
///
/// Provides controllable behavior for testing:
/// - Track invocations for assertions
/// - Simulate run time, honouring cancellation
/// - Inject failures (next call, or every estimation touching a time)
/// - Observe peak concurrency
///
/// Estimation fills f0 with a per-run marker (`100 + n` for the n-th
/// estimation) so tests can tell which run produced a phrase's features.
///
/// # Example
///
/// ```rust,ignore
/// use cantor_core::testing::MockRunner;
///
/// let runner = MockRunner::new();
/// runner.set_run_duration(Duration::from_millis(50)).await;
/// runner.fail_estimations_at(1500).await;
///
/// let session = ProjectSession::new(SessionConfig::default(), Arc::new(runner.clone()));
/// ```
#[derive(Debug, Clone)]
pub struct MockRunner {
    runs: Arc<RwLock<Vec<RecordedRun>>>,
    next_error: Arc<RwLock<Option<(RunnerStage, RunnerError)>>>,
    failing_points_ms: Arc<RwLock<Vec<u64>>>,
    run_duration_ms: Arc<RwLock<u64>>,
    estimations: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Create a new mock runner with a 10 ms run time.
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            failing_points_ms: Arc::new(RwLock::new(Vec::new())),
            run_duration_ms: Arc::new(RwLock::new(10)),
            estimations: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get all recorded runs.
    pub async fn recorded_runs(&self) -> Vec<RecordedRun> {
        self.runs.read().await.clone()
    }

    /// Recorded runs of one stage.
    pub async fn runs_for(&self, stage: RunnerStage) -> Vec<RecordedRun> {
        self.runs
            .read()
            .await
            .iter()
            .filter(|run| run.stage == stage)
            .cloned()
            .collect()
    }

    /// The recorded run of a job, if it finished.
    pub async fn run_of(&self, job_id: &str) -> Option<RecordedRun> {
        self.runs
            .read()
            .await
            .iter()
            .find(|run| run.job_id == job_id)
            .cloned()
    }

    /// Highest number of runs in progress at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Configure the next run of `stage` to fail with the given error.
    pub async fn set_next_error(&self, stage: RunnerStage, error: RunnerError) {
        *self.next_error.write().await = Some((stage, error));
    }

    /// Fail every estimation whose range contains `ms`.
    pub async fn fail_estimations_at(&self, ms: u64) {
        self.failing_points_ms.write().await.push(ms);
    }

    /// Stop failing estimations by time.
    pub async fn clear_failures(&self) {
        self.failing_points_ms.write().await.clear();
        *self.next_error.write().await = None;
    }

    /// Set the simulated run time.
    pub async fn set_run_duration(&self, duration: Duration) {
        *self.run_duration_ms.write().await = duration.as_millis() as u64;
    }

    async fn take_error(&self, stage: RunnerStage) -> Option<RunnerError> {
        let mut next = self.next_error.write().await;
        if next.as_ref().is_some_and(|(target, _)| *target == stage) {
            return next.take().map(|(_, error)| error);
        }
        None
    }

    /// Waits out the run time unless cancelled first.
    async fn simulate(
        &self,
        job_id: &str,
        stage: RunnerStage,
        cancel: &CancellationToken,
        progress: Option<&mpsc::Sender<RunnerProgress>>,
    ) -> Result<(), RunnerError> {
        let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        if let Some(tx) = progress {
            let _ = tx.try_send(RunnerProgress {
                job_id: job_id.to_string(),
                stage,
                line: format!("{} started", stage.as_str()),
                percent: Some(0.0),
            });
        }

        let duration_ms = *self.run_duration_ms.read().await;
        let result = tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(duration_ms)) => Ok(()),
            _ = cancel.cancelled() => Err(RunnerError::Cancelled),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn record(&self, run: RecordedRun) {
        self.runs.write().await.push(run);
    }
}

#[async_trait]
impl SynthesisRunner for MockRunner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn estimate(
        &self,
        request: EstimationRequest,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<RunnerProgress>>,
    ) -> Result<AcousticFeatures, RunnerError> {
        let marker = 100.0 + (self.estimations.fetch_add(1, Ordering::SeqCst) + 1) as f64;
        let engine = request.engine;
        let frames = engine
            .ms_to_frame(request.end_ms)
            .saturating_sub(engine.ms_to_frame(request.begin_ms));
        let mut run = RecordedRun {
            stage: RunnerStage::Estimation,
            job_id: request.job_id.clone(),
            range_ms: Some(request.begin_ms..request.end_ms),
            frames,
            marker,
            outcome: RunOutcome::Success,
        };

        if let Err(e) = self
            .simulate(&request.job_id, RunnerStage::Estimation, &cancel, progress.as_ref())
            .await
        {
            run.outcome = RunOutcome::Cancelled;
            self.record(run).await;
            return Err(e);
        }

        let injected = match self.take_error(RunnerStage::Estimation).await {
            Some(error) => Some(error),
            None => self
                .failing_points_ms
                .read()
                .await
                .iter()
                .find(|&&ms| request.begin_ms <= ms && ms < request.end_ms)
                .map(|ms| RunnerError::process_failed(Some(1), format!("cannot estimate at {} ms", ms))),
        };
        if let Some(error) = injected {
            run.outcome = RunOutcome::Failed;
            self.record(run).await;
            return Err(error);
        }

        self.record(run).await;
        let mut features = AcousticFeatures::silent(engine, frames);
        features.f0.iter_mut().for_each(|f0| *f0 = marker);
        Ok(features)
    }

    async fn render(
        &self,
        request: RenderRequest,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<RunnerProgress>>,
    ) -> Result<Vec<u8>, RunnerError> {
        let frames = request.features.frames();
        let mut run = RecordedRun {
            stage: RunnerStage::Render,
            job_id: request.job_id.clone(),
            range_ms: None,
            frames,
            marker: 0.0,
            outcome: RunOutcome::Success,
        };

        if let Err(e) = self
            .simulate(&request.job_id, RunnerStage::Render, &cancel, progress.as_ref())
            .await
        {
            run.outcome = RunOutcome::Cancelled;
            self.record(run).await;
            return Err(e);
        }

        if let Some(error) = self.take_error(RunnerStage::Render).await {
            run.outcome = RunOutcome::Failed;
            self.record(run).await;
            return Err(error);
        }

        self.record(run).await;
        let samples = vec![MOCK_SAMPLE; frames * samples_per_frame(request.engine)];
        Ok(encode_pcm_s16le(&samples))
    }
}

fn samples_per_frame(engine: EngineVersion) -> usize {
    (engine.sample_rate() * engine.frame_period_ms() / 1000) as usize
}
