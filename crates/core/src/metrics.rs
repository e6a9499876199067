//! Prometheus metrics for the scheduler.
//!
//! This module provides metrics for:
//! - Priority task queues (dispatches, cancellations)
//! - Phrase lifecycle (status transitions)
//! - External runners (invocation duration by stage and result)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

// =============================================================================
// Queue Metrics
// =============================================================================

/// Work items handed to a worker body, by queue.
pub static QUEUE_DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cantor_queue_dispatched_total",
            "Total work items dispatched to a worker",
        ),
        &["queue"], // "estimation", "render"
    )
    .unwrap()
});

/// Work items cancelled, by queue and whether they had started.
pub static QUEUE_CANCELLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cantor_queue_cancelled_total",
            "Total work items cancelled",
        ),
        &["queue", "phase"], // phase: "queued", "running"
    )
    .unwrap()
});

// =============================================================================
// Phrase Metrics
// =============================================================================

/// Phrase status transitions, by target status.
pub static PHRASE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cantor_phrase_transitions_total",
            "Total phrase status transitions",
        ),
        &["to"],
    )
    .unwrap()
});

// =============================================================================
// Runner Metrics
// =============================================================================

/// External runner invocation duration in seconds.
pub static RUNNER_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "cantor_runner_duration_seconds",
            "Duration of external estimation/render invocations",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["stage", "result"], // result: "success", "failed", "cancelled"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(QUEUE_DISPATCHED.clone()),
        Box::new(QUEUE_CANCELLED.clone()),
        Box::new(PHRASE_TRANSITIONS.clone()),
        Box::new(RUNNER_DURATION.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_in_fresh_registry() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        QUEUE_DISPATCHED.with_label_values(&["estimation"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "cantor_queue_dispatched_total"));
    }
}
