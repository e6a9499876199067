//! Bounded-concurrency priority executor.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use super::priority::{Priority, PriorityClass, PriorityCounters};
use super::types::{QueueStatus, QueueTask, QueueWorker};
use crate::metrics;

/// Tracks statistics for a queue.
#[derive(Default)]
struct QueueStats {
    dispatched: AtomicU64,
    finished: AtomicU64,
    cancelled: AtomicU64,
}

/// An item waiting for a worker slot.
struct Pending<T> {
    priority: Priority,
    seq: u64,
    task: Arc<T>,
}

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for Pending<T> {}

impl<T> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Pending<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max heap: the smallest (priority, seq) must compare greatest.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// An item whose worker body is running.
struct Running<T> {
    task: Arc<T>,
    finished: watch::Receiver<bool>,
}

struct QueueState<T> {
    active: bool,
    next_seq: u64,
    pending: BinaryHeap<Pending<T>>,
    running: HashMap<u64, Running<T>>,
    counters: PriorityCounters,
}

impl<T> QueueState<T> {
    fn len(&self) -> usize {
        self.pending.len() + self.running.len()
    }
}

struct QueueInner<T: QueueTask> {
    name: String,
    max_concurrency: usize,
    worker: Arc<dyn QueueWorker<T>>,
    state: Mutex<QueueState<T>>,
    stats: QueueStats,
    /// Bumped whenever items leave the queue.
    drained: watch::Sender<u64>,
}

/// Releases a worker slot when the worker body returns (or unwinds).
struct FinishGuard<T: QueueTask> {
    inner: Arc<QueueInner<T>>,
    seq: u64,
    done: watch::Sender<bool>,
}

impl<T: QueueTask> Drop for FinishGuard<T> {
    fn drop(&mut self) {
        self.inner.lock_state().running.remove(&self.seq);
        self.inner.stats.finished.fetch_add(1, Ordering::Relaxed);
        let _ = self.done.send(true);
        self.inner.pump();
        self.inner.notify_drained();
    }
}

impl<T: QueueTask> QueueInner<T> {
    fn lock_state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_drained(&self) {
        self.drained.send_modify(|count| *count += 1);
    }

    /// Starts queued items while slots are free and a session is active.
    fn pump(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        let mut dropped = false;
        let mut state = self.lock_state();
        while state.active && state.running.len() < self.max_concurrency {
            let Some(next) = state.pending.pop() else {
                break;
            };
            if next.task.cancellation_token().is_cancelled() {
                debug!(queue = %self.name, task = %next.task.label(), "Dropping cancelled item");
                dropped = true;
                continue;
            }

            let (done, finished) = watch::channel(false);
            state.running.insert(
                next.seq,
                Running {
                    task: Arc::clone(&next.task),
                    finished,
                },
            );
            next.task.mark_started();
            self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            metrics::QUEUE_DISPATCHED
                .with_label_values(&[self.name.as_str()])
                .inc();
            debug!(
                queue = %self.name,
                task = %next.task.label(),
                priority = next.priority,
                "Dispatching item"
            );

            let guard = FinishGuard {
                inner: Arc::clone(self),
                seq: next.seq,
                done,
            };
            let worker = Arc::clone(&self.worker);
            let task = next.task;
            handle.spawn(async move {
                let _guard = guard;
                worker.run(task).await;
            });
        }
        drop(state);

        if dropped {
            self.notify_drained();
        }
    }
}

/// Priority task queue with a bounded number of concurrently running items.
///
/// The item with the numerically smallest priority starts first; equal
/// priorities start in submission order. Items are only dispatched while a
/// session is active, but may be enqueued at any time.
pub struct PriorityTaskQueue<T: QueueTask> {
    inner: Arc<QueueInner<T>>,
}

impl<T: QueueTask> Clone for PriorityTaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: QueueTask> PriorityTaskQueue<T> {
    /// Creates an idle queue running at most `max_concurrency` items at once.
    pub fn new(
        name: impl Into<String>,
        max_concurrency: usize,
        worker: Arc<dyn QueueWorker<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                max_concurrency: max_concurrency.max(1),
                worker,
                state: Mutex::new(QueueState {
                    active: false,
                    next_seq: 0,
                    pending: BinaryHeap::new(),
                    running: HashMap::new(),
                    counters: PriorityCounters::new(),
                }),
                stats: QueueStats::default(),
                drained: watch::channel(0).0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Starts dispatching queued items.
    pub fn begin_session(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.active {
                return;
            }
            state.active = true;
        }
        info!(queue = %self.inner.name, "Queue session started");
        self.inner.pump();
    }

    /// Stops dispatching and cancels every queued or running item.
    pub async fn end_session(&self) {
        self.inner.lock_state().active = false;
        let cancelled = self.cancel(|_| true).await;
        info!(
            queue = %self.inner.name,
            cancelled = cancelled.len(),
            "Queue session ended"
        );
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock_state().active
    }

    /// Adds an item with an explicit priority.
    pub fn enqueue(&self, task: Arc<T>, priority: Priority) {
        {
            let mut state = self.inner.lock_state();
            Self::push(&mut state, task, priority);
        }
        self.inner.pump();
    }

    /// Adds an item, assigning its priority from this queue's class counters.
    ///
    /// Returns the assigned priority.
    pub fn enqueue_with_class(&self, task: Arc<T>, class: PriorityClass) -> Priority {
        let priority = {
            let mut state = self.inner.lock_state();
            let queued = state.len();
            let priority = state.counters.next(class, queued);
            Self::push(&mut state, task, priority);
            priority
        };
        self.inner.pump();
        priority
    }

    fn push(state: &mut QueueState<T>, task: Arc<T>, priority: Priority) {
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(Pending {
            priority,
            seq,
            task,
        });
    }

    /// Cancels every queued or running item matching `predicate` and waits
    /// until their worker bodies have returned.
    ///
    /// Returns the matching items that had not been cancelled before.
    pub async fn cancel<F>(&self, predicate: F) -> Vec<Arc<T>>
    where
        F: Fn(&T) -> bool + Send,
    {
        let (cancelled, waiters, removed) = {
            let mut state = self.inner.lock_state();
            let mut cancelled = Vec::new();
            let mut queued_hits = 0u64;
            let queued_before = state.pending.len();

            state.pending.retain(|pending| {
                if !predicate(pending.task.as_ref()) {
                    return true;
                }
                let token = pending.task.cancellation_token();
                if !token.is_cancelled() {
                    token.cancel();
                    cancelled.push(Arc::clone(&pending.task));
                    queued_hits += 1;
                }
                false
            });
            let removed = state.pending.len() < queued_before;

            let mut waiters = Vec::new();
            let mut running_hits = 0u64;
            for running in state.running.values() {
                if !predicate(running.task.as_ref()) {
                    continue;
                }
                let token = running.task.cancellation_token();
                if !token.is_cancelled() {
                    token.cancel();
                    cancelled.push(Arc::clone(&running.task));
                    running_hits += 1;
                }
                waiters.push(running.finished.clone());
            }

            self.record_cancelled("queued", queued_hits);
            self.record_cancelled("running", running_hits);
            (cancelled, waiters, removed)
        };
        if removed {
            self.inner.notify_drained();
        }

        if !cancelled.is_empty() {
            debug!(
                queue = %self.inner.name,
                cancelled = cancelled.len(),
                waiting = waiters.len(),
                "Cancelled items"
            );
        }

        join_all(waiters.into_iter().map(|mut finished| async move {
            // A closed channel means the worker is gone as well.
            let _ = finished.wait_for(|done| *done).await;
        }))
        .await;

        cancelled
    }

    fn record_cancelled(&self, phase: &str, count: u64) {
        if count == 0 {
            return;
        }
        self.inner
            .stats
            .cancelled
            .fetch_add(count, Ordering::Relaxed);
        metrics::QUEUE_CANCELLED
            .with_label_values(&[self.inner.name.as_str(), phase])
            .inc_by(count);
    }

    /// Number of items queued or running.
    pub fn len(&self) -> usize {
        self.inner.lock_state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once no item is queued or running.
    ///
    /// Items queued while no session is active keep this pending.
    pub async fn wait_idle(&self) {
        let mut drained = self.inner.drained.subscribe();
        while !self.is_empty() {
            if drained.changed().await.is_err() {
                return;
            }
        }
    }

    /// Number of items waiting for a worker slot.
    pub fn queued_len(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    /// Number of worker bodies currently running.
    pub fn running_len(&self) -> usize {
        self.inner.lock_state().running.len()
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.inner.lock_state();
        let stats = &self.inner.stats;
        QueueStatus {
            name: self.inner.name.clone(),
            session_active: state.active,
            active_jobs: state.running.len(),
            max_concurrent: self.inner.max_concurrency,
            queued_jobs: state.pending.len(),
            total_dispatched: stats.dispatched.load(Ordering::Relaxed),
            total_finished: stats.finished.load(Ordering::Relaxed),
            total_cancelled: stats.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FnWorker;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct TestTask {
        id: u32,
        token: CancellationToken,
    }

    impl TestTask {
        fn new(id: u32) -> Arc<Self> {
            Arc::new(Self {
                id,
                token: CancellationToken::new(),
            })
        }
    }

    impl QueueTask for TestTask {
        fn cancellation_token(&self) -> &CancellationToken {
            &self.token
        }

        fn label(&self) -> String {
            format!("test-{}", self.id)
        }
    }

    async fn wait_until_empty(queue: &PriorityTaskQueue<TestTask>) {
        for _ in 0..200 {
            if queue.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue did not drain");
    }

    fn recording_queue(max: usize) -> (PriorityTaskQueue<TestTask>, Arc<Mutex<Vec<u32>>>) {
        let order = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&order);
        let worker = FnWorker(move |task: Arc<TestTask>| {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(task.id);
            }
        });
        (PriorityTaskQueue::new("test", max, Arc::new(worker)), order)
    }

    #[tokio::test]
    async fn test_lowest_priority_number_runs_first() {
        let (queue, order) = recording_queue(1);
        queue.enqueue(TestTask::new(5), 50);
        queue.enqueue(TestTask::new(1), 10);
        queue.enqueue(TestTask::new(3), 30);
        queue.enqueue(TestTask::new(4), 30);

        queue.begin_session();
        wait_until_empty(&queue).await;

        assert_eq!(*order.lock().unwrap(), vec![1, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_nothing_runs_before_session() {
        let (queue, order) = recording_queue(2);
        queue.enqueue(TestTask::new(1), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(order.lock().unwrap().is_empty());
        assert_eq!(queue.queued_len(), 1);
        assert!(!queue.status().session_active);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (c, p) = (Arc::clone(&current), Arc::clone(&peak));
        let worker = FnWorker(move |_task: Arc<TestTask>| {
            let (current, peak) = (Arc::clone(&c), Arc::clone(&p));
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }
        });
        let queue = PriorityTaskQueue::new("bounded", 2, Arc::new(worker));

        for id in 0..6 {
            queue.enqueue(TestTask::new(id), 1);
        }
        queue.begin_session();
        assert!(queue.running_len() <= 2);
        wait_until_empty(&queue).await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        let status = queue.status();
        assert_eq!(status.total_dispatched, 6);
        assert_eq!(status.total_finished, 6);
    }

    #[tokio::test]
    async fn test_cancel_waits_for_running_worker() {
        let finished = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&finished);
        let worker = FnWorker(move |task: Arc<TestTask>| {
            let finished = Arc::clone(&f);
            async move {
                task.token.cancelled().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            }
        });
        let queue = PriorityTaskQueue::new("cancel", 1, Arc::new(worker));
        queue.begin_session();

        let running = TestTask::new(1);
        let queued = TestTask::new(2);
        queue.enqueue(Arc::clone(&running), 1);
        queue.enqueue(Arc::clone(&queued), 2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.running_len(), 1);

        let cancelled = queue.cancel(|task| task.id == 1).await;

        assert_eq!(cancelled.len(), 1);
        assert!(running.token.is_cancelled());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!queued.token.is_cancelled());
        queue.end_session().await;
    }

    #[tokio::test]
    async fn test_cancel_removes_queued_items() {
        let (queue, order) = recording_queue(1);
        let task = TestTask::new(7);
        queue.enqueue(Arc::clone(&task), 1);

        let cancelled = queue.cancel(|t| t.id == 7).await;
        assert_eq!(cancelled.len(), 1);
        assert!(task.token.is_cancelled());
        assert!(queue.is_empty());

        // Cancelling again reports nothing new.
        assert!(queue.cancel(|t| t.id == 7).await.is_empty());

        queue.begin_session();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(order.lock().unwrap().is_empty());
        assert_eq!(queue.status().total_cancelled, 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_item_is_skipped() {
        let (queue, order) = recording_queue(1);
        let task = TestTask::new(3);
        task.token.cancel();
        queue.enqueue(task, 1);
        queue.enqueue(TestTask::new(4), 2);

        queue.begin_session();
        wait_until_empty(&queue).await;
        assert_eq!(*order.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_end_session_cancels_everything() {
        let worker = FnWorker(|task: Arc<TestTask>| async move {
            task.token.cancelled().await;
        });
        let queue = PriorityTaskQueue::new("end", 1, Arc::new(worker));
        queue.begin_session();
        let a = TestTask::new(1);
        let b = TestTask::new(2);
        queue.enqueue(Arc::clone(&a), 1);
        queue.enqueue(Arc::clone(&b), 2);
        tokio::time::sleep(Duration::from_millis(10)).await;

        queue.end_session().await;

        assert!(a.token.is_cancelled());
        assert!(b.token.is_cancelled());
        assert!(queue.is_empty());
        assert!(!queue.is_active());
    }

    #[tokio::test]
    async fn test_class_priorities_reset_after_drain() {
        let (queue, _order) = recording_queue(1);
        let assigned: Vec<_> = (0..3)
            .map(|id| queue.enqueue_with_class(TestTask::new(id), PriorityClass::Sequence))
            .collect();
        assert_eq!(assigned, vec![900_000, 900_001, 900_002]);

        let edit = queue.enqueue_with_class(TestTask::new(9), PriorityClass::Edit);
        assert_eq!(edit, 1);

        queue.begin_session();
        wait_until_empty(&queue).await;

        let again = queue.enqueue_with_class(TestTask::new(10), PriorityClass::Sequence);
        assert_eq!(again, 900_000);
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_after_last_worker() {
        let worker = FnWorker(|_task: Arc<TestTask>| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        let queue = PriorityTaskQueue::new("idle", 1, Arc::new(worker));
        for id in 0..3 {
            queue.enqueue(TestTask::new(id), 1);
        }
        queue.begin_session();

        tokio::time::timeout(Duration::from_secs(2), queue.wait_idle())
            .await
            .expect("queue never became idle");
        assert!(queue.is_empty());
        assert_eq!(queue.status().total_finished, 3);
    }

    #[tokio::test]
    async fn test_wait_idle_sees_cancelled_queued_items() {
        let (queue, _order) = recording_queue(1);
        queue.enqueue(TestTask::new(1), 1);

        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.wait_idle().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        queue.cancel(|_| true).await;
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("cancel did not wake the waiter")
            .unwrap();
    }
}
