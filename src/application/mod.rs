//! Application layer - Use cases and port interfaces
//!
//! Contains the recording engine, its supporting policies and the
//! trait definitions for external system interactions.

pub mod checkpoint;
pub mod classifier;
pub mod engine;
pub mod events;
pub mod limits;
pub mod ports;

// Re-export the engine surface
pub use engine::{EngineClosed, EngineHandle, RecordingEngine};
pub use events::{EngineEvent, RouteChange};
