//! Recording session and segment bookkeeping

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration as StdDuration, SystemTime};

use thiserror::Error;
use tokio::time::Instant;

/// Error for invalid segment bookkeeping
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("A segment is already open")]
    SegmentAlreadyOpen,

    #[error("No segment is open")]
    NoOpenSegment,
}

/// A segment file that is still being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSegment {
    pub index: u32,
    pub path: PathBuf,
    pub opened_at: SystemTime,
}

/// A finalized segment file, eligible for merging.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedSegment {
    pub index: u32,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration: StdDuration,
    pub opened_at: SystemTime,
    pub sealed_at: SystemTime,
}

/// Geotag captured at session start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSnapshot {
    pub latitude: f64,
    pub longitude: f64,
}

impl FromStr for LocationSnapshot {
    type Err = String;

    /// Parse "lat,lon" decimal degrees, e.g. "59.33,18.07"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || format!("invalid location \"{}\", expected \"lat,lon\"", s);
        let (lat, lon) = s.split_once(',').ok_or_else(err)?;
        let latitude: f64 = lat.trim().parse().map_err(|_| err())?;
        let longitude: f64 = lon.trim().parse().map_err(|_| err())?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(err());
        }
        Ok(Self { latitude, longitude })
    }
}

/// Caller-supplied options for a new session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Directory the finished artifact lands in
    pub output_dir: PathBuf,
    /// File stem for the artifact; a timestamp stem is generated when absent
    pub label: Option<String>,
    pub location: Option<LocationSnapshot>,
}

/// Live bookkeeping for one recording session.
///
/// At most one segment is open at any time; the type carries open and
/// sealed segments separately so that invariant cannot be violated by
/// accident.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    /// Where the merged artifact will land
    pub artifact_path: PathBuf,
    /// Wall-clock creation time, recorded in the artifact metadata
    pub started_wall: SystemTime,
    /// Logic-clock anchor for elapsed-duration policy
    pub started: Instant,
    pub last_checkpoint: Instant,
    pub location: Option<LocationSnapshot>,
    sealed: Vec<SealedSegment>,
    open: Option<OpenSegment>,
}

impl RecordingSession {
    pub fn new(
        artifact_path: PathBuf,
        location: Option<LocationSnapshot>,
        started: Instant,
        started_wall: SystemTime,
    ) -> Self {
        Self {
            artifact_path,
            started_wall,
            started,
            last_checkpoint: started,
            location,
            sealed: Vec::new(),
            open: None,
        }
    }

    pub fn begin_segment(&mut self, segment: OpenSegment) -> Result<(), SessionError> {
        if self.open.is_some() {
            return Err(SessionError::SegmentAlreadyOpen);
        }
        self.open = Some(segment);
        Ok(())
    }

    /// Hand the open segment over for sealing.
    pub fn take_open(&mut self) -> Option<OpenSegment> {
        self.open.take()
    }

    pub fn open_segment(&self) -> Option<&OpenSegment> {
        self.open.as_ref()
    }

    pub fn push_sealed(&mut self, segment: SealedSegment) {
        self.sealed.push(segment);
    }

    pub fn sealed(&self) -> &[SealedSegment] {
        &self.sealed
    }

    pub fn next_index(&self) -> u32 {
        let sealed_max = self.sealed.iter().map(|s| s.index + 1).max().unwrap_or(0);
        match &self.open {
            Some(open) => sealed_max.max(open.index + 1),
            None => sealed_max,
        }
    }

    pub fn total_sealed_bytes(&self) -> u64 {
        self.sealed.iter().map(|s| s.size_bytes).sum()
    }

    pub fn total_sealed_duration(&self) -> StdDuration {
        self.sealed.iter().map(|s| s.duration).sum()
    }

    /// Every file this session may have on disk, open segment included.
    pub fn all_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.sealed.iter().map(|s| s.path.clone()).collect();
        if let Some(open) = &self.open {
            paths.push(open.path.clone());
        }
        paths
    }

    pub fn touch_checkpoint(&mut self, now: Instant) {
        self.last_checkpoint = now;
    }

    pub fn elapsed(&self, now: Instant) -> StdDuration {
        now.saturating_duration_since(self.started)
    }
}

/// The outbound record of a finished session.
#[derive(Debug, Clone)]
pub struct CompletedRecording {
    pub artifact_path: PathBuf,
    pub duration: StdDuration,
    pub file_size_bytes: u64,
    pub started_at: SystemTime,
    pub location: Option<LocationSnapshot>,
    /// True when the artifact was recovered from a failed session
    pub salvaged: bool,
}

impl CompletedRecording {
    pub fn file_name(&self) -> &str {
        self.artifact_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<unnamed>")
    }
}

/// Artifact paths that share a directory and file stem.
pub fn sibling_path(artifact: &Path, suffix: &str) -> PathBuf {
    let stem = artifact
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recording");
    let ext = artifact.extension().and_then(|e| e.to_str()).unwrap_or("wav");
    artifact.with_file_name(format!("{}{}.{}", stem, suffix, ext))
}

/// Segment file path for a given index, next to the artifact.
pub fn segment_path(artifact: &Path, index: u32) -> PathBuf {
    sibling_path(artifact, &format!("_seg{}", index))
}

/// Destination for an artifact salvaged out of a failed session.
pub fn recovered_path(artifact: &Path) -> PathBuf {
    sibling_path(artifact, "-recovered")
}
