//! Segment store port interface

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use thiserror::Error;

use crate::domain::session::SealedSegment;

use super::capture::SealedStats;

/// Merge errors
#[derive(Debug, Clone, Error)]
pub enum MergeError {
    #[error("No segments to merge")]
    NoSegments,

    #[error("No segment was decodable")]
    NoDecodableSegments,

    #[error("Merge I/O failed: {0}")]
    Io(String),

    #[error("Failed to encode merged audio: {0}")]
    Encode(String),

    #[error("Merged file failed verification: {0}")]
    VerifyFailed(String),
}

/// What a finished merge produced.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub artifact_path: PathBuf,
    pub file_size_bytes: u64,
    pub duration: StdDuration,
    pub segments_merged: usize,
    /// Undecodable segments skimmed over rather than failing the merge
    pub segments_skipped: usize,
}

/// Port for segment files on disk: stitching, probing, cleanup.
///
/// Merge never deletes a segment before the destination is written
/// and verified, so a failed merge always leaves the inputs intact.
pub trait SegmentStore: Send + Sync {
    /// Concatenate `segments` in index order into `dest`.
    ///
    /// A single segment is promoted by rename instead of re-encoding.
    /// An existing file at `dest` is replaced.
    fn merge(&self, segments: &[SealedSegment], dest: &Path) -> Result<MergeOutcome, MergeError>;

    /// Read size and duration from a segment file directly, for when
    /// the capture device could not report them at seal time.
    fn probe(&self, path: &Path) -> Option<SealedStats>;

    /// Best-effort removal of session files. Returns how many were
    /// actually deleted.
    fn discard_files(&self, paths: &[PathBuf]) -> usize;
}
