//! Capture device port interface

use std::path::Path;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use thiserror::Error;

/// Capture errors
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("No audio input device available")]
    NoInputDevice,

    #[error("Failed to open capture: {0}")]
    OpenFailed(String),

    #[error("A segment is already open")]
    SegmentAlreadyOpen,

    #[error("No segment is open")]
    NoOpenSegment,

    #[error("Failed to seal segment: {0}")]
    SealFailed(String),

    #[error("Failed to flush captured audio: {0}")]
    FlushFailed(String),

    #[error("Capture stream failed: {0}")]
    StreamFailed(String),
}

/// What a sealed segment file holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SealedStats {
    pub size_bytes: u64,
    pub duration: StdDuration,
}

/// Port for segment-oriented audio capture.
///
/// A device writes exactly one segment file at a time. Opening a
/// segment starts (or restarts) the underlying stream; sealing
/// finalizes the file and leaves the stream stopped until the next
/// open. Pause keeps the stream warm but drops samples, so the file
/// stays open across short interruptions.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Begin writing a new segment file at `path`.
    ///
    /// # Returns
    /// An error if a segment is already open or the input device
    /// cannot be started.
    async fn open_segment(&self, path: &Path) -> Result<(), CaptureError>;

    /// Finalize the open segment and report its size and duration.
    async fn seal_segment(&self) -> Result<SealedStats, CaptureError>;

    /// Stop consuming samples without closing the segment file.
    async fn pause(&self) -> Result<(), CaptureError>;

    /// Resume consuming samples into the open segment.
    async fn resume(&self) -> Result<(), CaptureError>;

    /// Push buffered samples to disk and sync the segment file, so a
    /// crash right now would lose at most the unflushed tail.
    async fn flush(&self) -> Result<(), CaptureError>;

    /// Tear the stream down, finalizing any open segment best-effort.
    async fn shutdown(&self) -> Result<(), CaptureError>;

    /// Bytes written to the open segment so far
    fn bytes_written(&self) -> u64;

    /// Recent input level in dBFS, 0.0 is full scale
    fn level_dbfs(&self) -> f32;

    /// True while a stream is live and not paused
    fn is_capturing(&self) -> bool;
}
