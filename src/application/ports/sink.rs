//! Completion handoff port interface

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::session::CompletedRecording;

/// Handoff errors
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("Failed to hand off completed recording: {0}")]
    HandoffFailed(String),
}

/// Port for delivering finished recordings to the rest of the app.
///
/// The artifact is already durable on disk when this fires; a failing
/// sink loses the announcement, never the audio.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn recording_completed(&self, recording: &CompletedRecording) -> Result<(), SinkError>;
}
