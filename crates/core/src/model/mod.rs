//! Track/phrase model touched by the scheduler.
//!
//! The scheduler never creates or destroys phrases; it reads their identity and
//! time range and mutates status, features and the track waveform as pipeline
//! stages complete.

mod engine;
mod error;
mod features;
mod phrase;
mod status;
mod track;

pub use engine::{EngineVersion, QualityMode};
pub use error::ModelError;
pub use features::AcousticFeatures;
pub use phrase::{Phrase, TimedPhoneme};
pub use status::PhraseStatus;
pub use track::{ExclusiveRender, Track, TrackEvent, TrackId};
