//! Project session lifecycle integration tests.
//!
//! These tests verify the session with the mock runner:
//! - Estimation handing over to rendering until phrases are complete
//! - Cancel-before-enqueue keeping one live item per phrase
//! - Whole-track failures decomposed into per-phrase retries
//! - Displaced phrases re-queued after a phrase-level edit
//! - Session state gating enqueues and worker bodies

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use cantor_core::{
    runner::RunnerStage,
    testing::{fixtures, MockRunner, RunOutcome, MOCK_SAMPLE},
    AcousticFeatures, EngineVersion, PhraseStatus, PriorityClass, ProjectSession, RunnerError,
    SessionConfig, SessionState, Track, TrackEvent,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Test helper bundling a session with its mock runner.
struct TestHarness {
    session: ProjectSession,
    runner: MockRunner,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_run_duration(Duration::from_millis(10)).await
    }

    async fn with_run_duration(duration: Duration) -> Self {
        let runner = MockRunner::new();
        runner.set_run_duration(duration).await;
        let session = ProjectSession::new(SessionConfig::default(), Arc::new(runner.clone()));
        Self { session, runner }
    }

    /// Waits until both queues are empty and every phrase is settled.
    async fn wait_quiet(&self, track: &Track) {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            let settled = track.statuses().await.iter().all(PhraseStatus::is_settled);
            if settled && self.session.is_idle() {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "session did not settle: {:?}",
                track.statuses().await
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Waits until one phrase is settled and both queues are empty.
    async fn wait_for_phrase(&self, track: &Track, no: usize) {
        let reached = fixtures::wait_for_statuses(track, TIMEOUT, |statuses| {
            statuses[no].is_settled()
        })
        .await;
        assert!(reached, "phrase {} did not settle", no);
        while !self.session.is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn estimation_runs(&self, range: std::ops::Range<u64>) -> Vec<RunOutcome> {
        self.runner
            .runs_for(RunnerStage::Estimation)
            .await
            .into_iter()
            .filter(|run| run.range_ms.as_ref() == Some(&range))
            .map(|run| run.outcome)
            .collect()
    }
}

#[tokio::test]
async fn test_whole_track_reaches_complete() {
    let harness = TestHarness::new().await;
    let track = fixtures::two_phrase_track();
    harness.session.begin();

    let element = harness
        .session
        .enqueue_estimate_track(&track, PriorityClass::Sequence)
        .await
        .unwrap();
    assert!(element.is_whole_track());

    harness.wait_quiet(&track).await;

    assert_eq!(
        track.statuses().await,
        vec![PhraseStatus::Complete, PhraseStatus::Complete]
    );
    let estimations = harness.runner.runs_for(RunnerStage::Estimation).await;
    assert_eq!(estimations.len(), 1);
    assert_eq!(estimations[0].range_ms, Some(0..2000));
    assert_eq!(harness.runner.runs_for(RunnerStage::Render).await.len(), 1);

    // Features were sliced per phrase: 1000 ms at 5 ms frames.
    for phrase in track.phrases().await {
        let features = phrase.acoustic_features.unwrap();
        assert_eq!(features.frames(), 200);
        assert!(features.f0.iter().all(|&f0| f0 == estimations[0].marker));
    }

    let waveform = track.waveform().await;
    assert_eq!(waveform.len(), EngineVersion::V1.ms_to_sample(2000));
    assert!(waveform.iter().all(|&s| s == MOCK_SAMPLE));
}

#[tokio::test]
async fn test_phrase_edit_during_whole_track_estimation() {
    let harness = TestHarness::with_run_duration(Duration::from_millis(200)).await;
    let track = fixtures::two_phrase_track();
    harness.session.begin();

    let whole = harness
        .session
        .enqueue_estimate_track(&track, PriorityClass::Sequence)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let single = harness
        .session
        .enqueue_estimate_phrase(&track, 0, PriorityClass::Edit)
        .await
        .unwrap();
    // The older item was cancelled (and had stopped) before the new one was queued.
    assert!(whole.is_cancellation_requested());
    assert!(!single.is_cancellation_requested());

    harness.wait_quiet(&track).await;

    assert_eq!(
        track.statuses().await,
        vec![PhraseStatus::Complete, PhraseStatus::Complete]
    );
    assert_eq!(
        harness.estimation_runs(0..2000).await,
        vec![RunOutcome::Cancelled]
    );

    // P1 reflects only the single-phrase run.
    let single_run = harness
        .runner
        .run_of(&single.id().to_string())
        .await
        .unwrap();
    let p1 = track.phrase(0).await.unwrap();
    assert!(p1
        .acoustic_features
        .unwrap()
        .f0
        .iter()
        .all(|&f0| f0 == single_run.marker));

    // P2 was re-queued on its own rather than dropped.
    assert_eq!(
        harness.estimation_runs(1000..2000).await,
        vec![RunOutcome::Success]
    );
}

#[tokio::test]
async fn test_second_enqueue_supersedes_first() {
    let harness = TestHarness::with_run_duration(Duration::from_millis(100)).await;
    let track = fixtures::two_phrase_track();
    harness.session.begin();

    let first = harness
        .session
        .enqueue_estimate_phrase(&track, 1, PriorityClass::Edit)
        .await
        .unwrap();
    let second = harness
        .session
        .enqueue_estimate_phrase(&track, 1, PriorityClass::Edit)
        .await
        .unwrap();

    assert!(first.is_cancellation_requested());
    harness.wait_for_phrase(&track, 1).await;

    let successes: Vec<_> = harness
        .runner
        .runs_for(RunnerStage::Estimation)
        .await
        .into_iter()
        .filter(|run| run.outcome == RunOutcome::Success)
        .collect();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].job_id, second.id().to_string());

    let p2 = track.phrase(1).await.unwrap();
    assert!(p2
        .acoustic_features
        .unwrap()
        .f0
        .iter()
        .all(|&f0| f0 == successes[0].marker));
    // P1 was never touched.
    assert_eq!(track.status(0).await, Some(PhraseStatus::WaitEstimate));
}

#[tokio::test]
async fn test_whole_track_failure_is_retried_per_phrase() {
    let harness = TestHarness::new().await;
    harness.runner.fail_estimations_at(1500).await;
    let track = fixtures::two_phrase_track();
    harness.session.begin();

    harness
        .session
        .enqueue_estimate_track(&track, PriorityClass::Sequence)
        .await
        .unwrap();
    harness.wait_quiet(&track).await;

    assert_eq!(
        track.statuses().await,
        vec![PhraseStatus::Complete, PhraseStatus::EstimateError]
    );
    assert_eq!(harness.estimation_runs(0..2000).await, vec![RunOutcome::Failed]);
    assert_eq!(harness.estimation_runs(0..1000).await, vec![RunOutcome::Success]);
    assert_eq!(harness.estimation_runs(1000..2000).await, vec![RunOutcome::Failed]);

    // Only the good phrase made it into the waveform.
    let waveform = track.waveform().await;
    assert_eq!(waveform.len(), EngineVersion::V1.ms_to_sample(1000));
}

#[tokio::test]
async fn test_whole_track_render_failure_is_retried_per_phrase() {
    let harness = TestHarness::new().await;
    harness
        .runner
        .set_next_error(
            RunnerStage::Render,
            RunnerError::process_failed(Some(2), "vocoder crashed"),
        )
        .await;
    let track = fixtures::two_phrase_track();
    harness.session.begin();

    harness
        .session
        .enqueue_estimate_track(&track, PriorityClass::Sequence)
        .await
        .unwrap();
    harness.wait_quiet(&track).await;

    assert_eq!(
        track.statuses().await,
        vec![PhraseStatus::Complete, PhraseStatus::Complete]
    );
    let outcomes: Vec<_> = harness
        .runner
        .runs_for(RunnerStage::Render)
        .await
        .into_iter()
        .map(|run| run.outcome)
        .collect();
    assert_eq!(
        outcomes.iter().filter(|&&o| o == RunOutcome::Failed).count(),
        1
    );
    assert_eq!(
        outcomes.iter().filter(|&&o| o == RunOutcome::Success).count(),
        2
    );
    assert_eq!(
        track.waveform().await.len(),
        EngineVersion::V1.ms_to_sample(2000)
    );
}

#[tokio::test]
async fn test_wait_idle_outlasts_whole_track_failure() {
    let harness = TestHarness::new().await;
    harness
        .runner
        .set_next_error(
            RunnerStage::Estimation,
            RunnerError::process_failed(Some(1), "model load failed"),
        )
        .await;
    let track = fixtures::track("choir", EngineVersion::V1, 8, 500);
    harness.session.begin();

    harness
        .session
        .enqueue_estimate_track(&track, PriorityClass::Sequence)
        .await
        .unwrap();
    tokio::time::timeout(TIMEOUT, harness.session.wait_idle())
        .await
        .expect("session never became idle");

    // Every phrase read EstimateError for a moment; the retries still ran.
    assert!(harness.session.is_idle());
    assert_eq!(track.statuses().await, vec![PhraseStatus::Complete; 8]);
    assert_eq!(
        harness.estimation_runs(0..4000).await,
        vec![RunOutcome::Failed]
    );
    for no in 0..8u64 {
        assert_eq!(
            harness.estimation_runs(no * 500..(no + 1) * 500).await,
            vec![RunOutcome::Success]
        );
    }
}

#[tokio::test]
async fn test_misaligned_edits_fail_the_phrase() {
    let harness = TestHarness::new().await;
    let mut bad = fixtures::phrase(0, 0, 1000);
    let mut edits = AcousticFeatures::silent(EngineVersion::V1, 200);
    edits.f0.push(0.0);
    bad.edited_features = Some(edits);
    let track = Arc::new(Track::new(
        "vocal",
        EngineVersion::V1,
        vec![bad, fixtures::phrase(1, 1000, 2000)],
    ));
    harness.session.begin();

    harness
        .session
        .enqueue_estimate_track(&track, PriorityClass::Sequence)
        .await
        .unwrap();
    harness.wait_quiet(&track).await;

    assert_eq!(
        track.statuses().await,
        vec![PhraseStatus::EstimateError, PhraseStatus::Complete]
    );
    // The bad phrase never reached the runner.
    assert!(harness.estimation_runs(0..1000).await.is_empty());
    assert_eq!(
        harness.estimation_runs(1000..2000).await,
        vec![RunOutcome::Success]
    );
}

#[tokio::test]
async fn test_phrase_render_displaces_whole_track_render() {
    let harness = TestHarness::new().await;
    let track = fixtures::two_phrase_track();
    harness.session.begin();
    harness
        .session
        .enqueue_estimate_track(&track, PriorityClass::Sequence)
        .await
        .unwrap();
    harness.wait_quiet(&track).await;

    harness
        .runner
        .set_run_duration(Duration::from_millis(300))
        .await;
    let whole = harness
        .session
        .enqueue_render_track(&track, PriorityClass::Sequence)
        .await
        .unwrap();
    let rendering = fixtures::wait_for_statuses(&track, TIMEOUT, |statuses| {
        statuses
            .iter()
            .all(|&s| s == PhraseStatus::AudioRenderProcessing)
    })
    .await;
    assert!(rendering);
    assert!(track.is_busy());

    let single = harness
        .session
        .enqueue_render_phrase(&track, 0, PriorityClass::Edit)
        .await
        .unwrap();
    assert!(whole.is_cancellation_requested());
    assert!(!track.is_busy());

    harness.wait_quiet(&track).await;
    assert!(!single.is_cancellation_requested());
    assert_eq!(
        track.statuses().await,
        vec![PhraseStatus::Complete, PhraseStatus::Complete]
    );

    // P2 was rendered on its own after the whole-track render stopped.
    let renders = harness.runner.runs_for(RunnerStage::Render).await;
    let whole_track: Vec<_> = renders.iter().filter(|r| r.frames == 400).map(|r| r.outcome).collect();
    let per_phrase = renders
        .iter()
        .filter(|r| r.frames == 200 && r.outcome == RunOutcome::Success)
        .count();
    assert_eq!(whole_track, vec![RunOutcome::Success, RunOutcome::Cancelled]);
    assert_eq!(per_phrase, 2);
}

#[tokio::test]
async fn test_render_enqueue_skips_phrases_without_features() {
    let harness = TestHarness::new().await;
    let track = fixtures::two_phrase_track();
    harness.session.begin();

    assert!(harness
        .session
        .enqueue_render_phrase(&track, 0, PriorityClass::Edit)
        .await
        .is_none());
    assert!(harness
        .session
        .enqueue_render_track(&track, PriorityClass::Sequence)
        .await
        .is_none());
    assert!(harness.runner.recorded_runs().await.is_empty());
    assert_eq!(track.status(0).await, Some(PhraseStatus::WaitEstimate));
}

#[tokio::test]
async fn test_nothing_runs_before_begin() {
    let harness = TestHarness::new().await;
    let track = fixtures::two_phrase_track();

    let element = harness
        .session
        .enqueue_estimate_track(&track, PriorityClass::Sequence)
        .await;
    assert!(element.is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(harness.runner.recorded_runs().await.is_empty());
    assert_eq!(harness.session.status().estimation.queued_jobs, 1);
    assert_eq!(harness.session.state(), SessionState::Idle);

    harness.session.begin();
    harness.wait_quiet(&track).await;
    assert!(track
        .statuses()
        .await
        .iter()
        .all(|&s| s == PhraseStatus::Complete));
}

#[tokio::test]
async fn test_ended_session_ignores_enqueues() {
    let harness = TestHarness::new().await;
    let track = fixtures::two_phrase_track();
    harness.session.begin();
    harness.session.end().await;

    assert_eq!(harness.session.state(), SessionState::Ended);
    assert!(harness
        .session
        .enqueue_estimate_track(&track, PriorityClass::Edit)
        .await
        .is_none());
    assert!(harness
        .session
        .enqueue_estimate_phrases(&track, &[0, 1], PriorityClass::Edit)
        .await
        .is_empty());

    // A later begin does not revive it.
    harness.session.begin();
    assert_eq!(harness.session.state(), SessionState::Ended);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(harness.runner.recorded_runs().await.is_empty());
}

#[tokio::test]
async fn test_end_cancels_running_work() {
    let harness = TestHarness::with_run_duration(Duration::from_secs(10)).await;
    let track = fixtures::two_phrase_track();
    harness.session.begin();

    let element = harness
        .session
        .enqueue_estimate_track(&track, PriorityClass::Sequence)
        .await
        .unwrap();
    let started = fixtures::wait_for_statuses(&track, TIMEOUT, |statuses| {
        statuses[0] == PhraseStatus::EstimateProcessing
    })
    .await;
    assert!(started);

    harness.session.end().await;

    assert!(element.is_cancellation_requested());
    assert!(harness.session.is_idle());
    assert_eq!(
        harness.estimation_runs(0..2000).await,
        vec![RunOutcome::Cancelled]
    );
    // Cancellation leaves the status for the canceller to decide.
    assert_eq!(
        track.statuses().await,
        vec![PhraseStatus::EstimateProcessing, PhraseStatus::EstimateProcessing]
    );
}

#[tokio::test]
async fn test_cancel_for_phrase_only_touches_that_phrase() {
    let harness = TestHarness::with_run_duration(Duration::from_secs(10)).await;
    let track = fixtures::track("choir", EngineVersion::V2, 3, 500);
    harness.session.begin();

    let elements = harness
        .session
        .enqueue_estimate_phrases(&track, &[0, 1, 2], PriorityClass::Edit)
        .await;
    assert_eq!(elements.len(), 3);

    let cancelled = harness.session.cancel_for_phrase(&track, 1).await;
    assert_eq!(cancelled, 1);
    assert!(!elements[0].is_cancellation_requested());
    assert!(elements[1].is_cancellation_requested());
    assert!(!elements[2].is_cancellation_requested());

    let other = fixtures::two_phrase_track();
    assert_eq!(harness.session.cancel_all_for_track(&other).await, 0);
    assert_eq!(harness.session.cancel_all_for_track(&track).await, 2);
    assert_eq!(harness.session.cancel_all().await, 0);
    assert!(harness.session.is_idle());
}

#[tokio::test]
async fn test_concurrency_is_bounded_per_queue() {
    let harness = TestHarness::with_run_duration(Duration::from_millis(30)).await;
    let track = fixtures::track("long", EngineVersion::V1, 8, 250);
    harness.session.begin();

    let nos: Vec<usize> = (0..8).collect();
    let elements = harness
        .session
        .enqueue_estimate_phrases(&track, &nos, PriorityClass::Sequence)
        .await;
    assert_eq!(elements.len(), 8);

    let status = harness.session.status();
    assert_eq!(status.estimation.max_concurrent, 2);
    assert!(status.estimation.active_jobs <= 2);

    harness.wait_quiet(&track).await;
    // Two estimation slots plus two render slots.
    assert!(harness.runner.peak_concurrency() <= 4);
    assert!(harness.runner.peak_concurrency() >= 2);
    assert!(track
        .statuses()
        .await
        .iter()
        .all(|&s| s == PhraseStatus::Complete));
}

#[tokio::test]
async fn test_observers_are_notified() {
    let harness = TestHarness::new().await;
    let track = fixtures::two_phrase_track();
    let mut events = track.subscribe();
    harness.session.begin();

    harness
        .session
        .enqueue_estimate_phrase(&track, 0, PriorityClass::Edit)
        .await
        .unwrap();
    harness.wait_for_phrase(&track, 0).await;

    let mut changes = Vec::new();
    let mut feature_changes = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            TrackEvent::StatusChanged { phrase_no, to, .. } => {
                assert_eq!(phrase_no, 0);
                changes.push(to);
            }
            TrackEvent::FeaturesChanged { track_id } => {
                assert_eq!(track_id, track.id());
                feature_changes += 1;
            }
        }
    }

    assert_eq!(
        changes,
        vec![
            PhraseStatus::WaitEstimate,
            PhraseStatus::EstimateProcessing,
            PhraseStatus::WaitAudioRender,
            PhraseStatus::AudioRenderProcessing,
            PhraseStatus::Complete,
        ]
    );
    assert!(feature_changes >= changes.len());
}

#[tokio::test]
async fn test_progress_is_forwarded() {
    let runner = MockRunner::new();
    runner.set_run_duration(Duration::from_millis(5)).await;
    let (tx, mut rx) = mpsc::channel(64);
    let session =
        ProjectSession::with_progress(SessionConfig::default(), Arc::new(runner.clone()), tx);
    let track = fixtures::two_phrase_track();
    session.begin();

    let element = session
        .enqueue_estimate_phrase(&track, 1, PriorityClass::Edit)
        .await
        .unwrap();

    let update = tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.job_id, element.id().to_string());
    assert_eq!(update.stage, RunnerStage::Estimation);

    session.end().await;
}
