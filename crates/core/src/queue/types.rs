//! Trait seams and status types for the priority task queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// An item that can be scheduled on a [`PriorityTaskQueue`](super::PriorityTaskQueue).
pub trait QueueTask: Send + Sync + 'static {
    /// Cooperative cancellation handle owned by the item.
    fn cancellation_token(&self) -> &CancellationToken;

    /// Called by the queue right before the worker body is invoked.
    fn mark_started(&self) {}

    /// Short description used in log lines.
    fn label(&self) -> String;
}

/// The body executed for each dequeued item.
///
/// Implementations must observe the item's cancellation token and return
/// promptly once it is cancelled; the queue waits for them on cancel.
#[async_trait]
pub trait QueueWorker<T: QueueTask>: Send + Sync {
    async fn run(&self, task: Arc<T>);
}

/// Adapts an async closure into a [`QueueWorker`].
pub struct FnWorker<F>(pub F);

#[async_trait]
impl<T, F, Fut> QueueWorker<T> for FnWorker<F>
where
    T: QueueTask,
    F: Fn(Arc<T>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn run(&self, task: Arc<T>) {
        (self.0)(task).await
    }
}

/// Snapshot of a queue's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Queue name (e.g., "estimation", "render").
    pub name: String,
    /// Whether a session is active (items are being dispatched).
    pub session_active: bool,
    /// Number of worker bodies currently running.
    pub active_jobs: usize,
    /// Maximum concurrent worker bodies.
    pub max_concurrent: usize,
    /// Number of items waiting to start.
    pub queued_jobs: usize,
    /// Items handed to a worker since creation.
    pub total_dispatched: u64,
    /// Worker bodies that returned since creation.
    pub total_finished: u64,
    /// Items cancelled since creation.
    pub total_cancelled: u64,
}
