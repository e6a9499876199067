//! Project session: the pipeline orchestrator.
//!
//! A [`ProjectSession`] owns two [`PriorityTaskQueue`](crate::queue::PriorityTaskQueue)s:
//! - **Estimation**: acoustic features for a track or phrase
//! - **Render**: audio from those features, queued automatically after a
//!   successful estimation
//!
//! Work items are [`QueueElement`]s. Phrase statuses move through
//! [`PhraseStatus`](crate::model::PhraseStatus) as the worker bodies run.

mod config;
mod element;
mod project;
mod types;
mod workers;

pub use config::SessionConfig;
pub use element::QueueElement;
pub use project::ProjectSession;
pub use types::{SessionState, SessionStatus};
