//! Domain layer - Core business logic
//!
//! Contains value objects, entities, and domain errors.
//! This layer has no dependencies on external systems.

pub mod config;
pub mod duration;
pub mod error;
pub mod input;
pub mod interruption;
pub mod session;
pub mod state;

// Re-export common types
pub use config::{AppConfig, EngineConfig, TuningConfig};
pub use duration::Duration;
pub use error::*;
pub use input::{choose_input, InputKind, InputPort};
pub use interruption::{InterruptionEvent, InterruptionKind, ResolutionHint};
pub use session::{
    recovered_path, segment_path, sibling_path, CompletedRecording, LocationSnapshot, OpenSegment,
    RecordingSession, SealedSegment, SessionError, SessionOptions,
};
pub use state::{Phase, RecordingState, StopCause, UserDecision};
