pub mod config;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod runner;
pub mod session;
pub mod testing;

pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use model::{
    AcousticFeatures, EngineVersion, ModelError, Phrase, PhraseStatus, QualityMode, TimedPhoneme,
    Track, TrackEvent, TrackId,
};
pub use queue::{Priority, PriorityClass, PriorityTaskQueue, QueueStatus};
pub use runner::{ProcessRunner, RunnerConfig, RunnerError, RunnerProgress, SynthesisRunner};
pub use session::{ProjectSession, QueueElement, SessionConfig, SessionState, SessionStatus};
