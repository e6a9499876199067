//! Priority task queue and priority assignment policy.
//!
//! The queue is generic over the item type: anything that exposes a
//! cancellation token can be scheduled. Each queue owns its own class
//! counters, so estimation and rendering are prioritised independently.

mod priority;
mod task_queue;
mod types;

pub use priority::{Priority, PriorityClass, PriorityCounters};
pub use task_queue::PriorityTaskQueue;
pub use types::{FnWorker, QueueStatus, QueueTask, QueueWorker};
