//! Testing utilities and mock implementations.
//!
//! This module provides a mock [`SynthesisRunner`](crate::runner::SynthesisRunner)
//! and track fixtures, allowing session tests without the engine executables.
//!
//! # Example
//!
//! ```rust,ignore
//! use cantor_core::testing::{fixtures, MockRunner};
//!
//! let runner = MockRunner::new();
//! let track = fixtures::two_phrase_track();
//!
//! let session = ProjectSession::new(SessionConfig::default(), Arc::new(runner.clone()));
//! session.begin();
//! session.enqueue_estimate_track(&track, PriorityClass::Sequence).await;
//!
//! assert!(fixtures::wait_until_settled(&track, Duration::from_secs(5)).await);
//! ```

mod mock_runner;

pub use mock_runner::{MockRunner, RecordedRun, RunOutcome, MOCK_SAMPLE};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::model::{EngineVersion, Phrase, PhraseStatus, TimedPhoneme, Track};

    /// Create a phrase with one phoneme per 250 ms.
    pub fn phrase(no: usize, begin_ms: u64, end_ms: u64) -> Phrase {
        let phonemes = (begin_ms..end_ms)
            .step_by(250)
            .enumerate()
            .map(|(i, start)| TimedPhoneme {
                begin_ms: start,
                end_ms: (start + 250).min(end_ms),
                label: if i % 2 == 0 { "a".to_string() } else { "k".to_string() },
            })
            .collect();
        Phrase::new(no, begin_ms, end_ms, phonemes)
    }

    /// Create a track of `count` back-to-back phrases of `phrase_ms` each.
    pub fn track(name: &str, engine: EngineVersion, count: usize, phrase_ms: u64) -> Arc<Track> {
        let phrases = (0..count)
            .map(|no| phrase(no, no as u64 * phrase_ms, (no as u64 + 1) * phrase_ms))
            .collect();
        Arc::new(Track::new(name, engine, phrases))
    }

    /// Track with P1 (0-1000 ms) and P2 (1000-2000 ms).
    pub fn two_phrase_track() -> Arc<Track> {
        track("vocal", EngineVersion::V1, 2, 1000)
    }

    /// Polls until every phrase is complete or errored.
    pub async fn wait_until_settled(track: &Track, timeout: Duration) -> bool {
        wait_for_statuses(track, timeout, |statuses| {
            statuses.iter().all(PhraseStatus::is_settled)
        })
        .await
    }

    /// Polls until `predicate` holds for the track's statuses.
    pub async fn wait_for_statuses<F>(track: &Track, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[PhraseStatus]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&track.statuses().await) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
