//! Continuo - interruption-resilient audio journal recorder
//!
//! This crate records long-form audio from the microphone and keeps the
//! session alive across phone calls, input-device loss, OS preemption,
//! and backgrounding, merging the captured segments into one artifact
//! when the session ends.
//!
//! # Architecture
//!
//! The crate follows hexagonal (ports & adapters) architecture:
//!
//! - **Domain**: Core business logic, value objects, entities, and errors
//! - **Application**: The recording engine, its policies, and port interfaces (traits)
//! - **Infrastructure**: Adapter implementations (cpal, WAV store, notifications, probes)
//! - **CLI**: Command-line interface, argument parsing, and signal handling

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
