//! WAV segment store backed by hound
//!
//! Every segment the capture adapter writes shares one canonical spec
//! (16kHz mono 16-bit PCM), so stitching a session back together is
//! sample concatenation under a fresh header.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use hound::{WavReader, WavSpec, WavWriter};
use tracing::{debug, warn};

use crate::application::ports::{MergeError, MergeOutcome, SealedStats, SegmentStore};
use crate::domain::session::SealedSegment;

/// Segment store for PCM WAV files.
pub struct WavSegmentStore;

impl WavSegmentStore {
    pub fn new() -> Self {
        Self
    }

    fn open_reader(path: &Path) -> Option<WavReader<std::io::BufReader<fs::File>>> {
        match WavReader::open(path) {
            Ok(reader) => Some(reader),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "segment not decodable");
                None
            }
        }
    }

    fn file_stats(path: &Path) -> Result<SealedStats, MergeError> {
        let reader = WavReader::open(path)
            .map_err(|e| MergeError::VerifyFailed(format!("{}: {}", path.display(), e)))?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(MergeError::VerifyFailed(format!(
                "{}: zero sample rate",
                path.display()
            )));
        }
        let frames = reader.duration() as u64;
        let duration = StdDuration::from_secs_f64(frames as f64 / spec.sample_rate as f64);
        let size_bytes = fs::metadata(path).map_err(|e| MergeError::Io(e.to_string()))?.len();
        Ok(SealedStats { size_bytes, duration })
    }

    /// Replace whatever sits at `dest` with the file at `src`.
    fn replace_file(src: &Path, dest: &Path) -> Result<(), MergeError> {
        if dest.exists() {
            fs::remove_file(dest).map_err(|e| MergeError::Io(e.to_string()))?;
        }
        fs::rename(src, dest).map_err(|e| MergeError::Io(e.to_string()))
    }
}

impl Default for WavSegmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentStore for WavSegmentStore {
    fn merge(&self, segments: &[SealedSegment], dest: &Path) -> Result<MergeOutcome, MergeError> {
        if segments.is_empty() {
            return Err(MergeError::NoSegments);
        }

        let mut ordered: Vec<&SealedSegment> = segments.iter().collect();
        ordered.sort_by_key(|s| s.index);

        // A segment that cannot even be opened is skimmed over rather
        // than sinking the whole session.
        let decodable: Vec<&SealedSegment> = ordered
            .iter()
            .copied()
            .filter(|s| Self::open_reader(&s.path).is_some())
            .collect();
        let skipped = ordered.len() - decodable.len();
        if decodable.is_empty() {
            return Err(MergeError::NoDecodableSegments);
        }

        // One decodable segment is already the artifact, just misnamed
        if decodable.len() == 1 {
            let only = decodable[0];
            Self::replace_file(&only.path, dest)?;
            let stats = Self::file_stats(dest)?;
            debug!(dest = %dest.display(), "single segment promoted");
            return Ok(MergeOutcome {
                artifact_path: dest.to_path_buf(),
                file_size_bytes: stats.size_bytes,
                duration: stats.duration,
                segments_merged: 1,
                segments_skipped: skipped,
            });
        }

        let spec: WavSpec = match Self::open_reader(&decodable[0].path) {
            Some(reader) => reader.spec(),
            None => return Err(MergeError::NoDecodableSegments),
        };

        // Concatenate into a scratch file next to the destination, so
        // a failure partway leaves both dest and the inputs untouched.
        let tmp = scratch_path(dest);
        let write = || -> Result<usize, MergeError> {
            let mut writer =
                WavWriter::create(&tmp, spec).map_err(|e| MergeError::Io(e.to_string()))?;
            let mut merged = 0usize;
            for segment in &decodable {
                let Some(mut reader) = Self::open_reader(&segment.path) else {
                    continue;
                };
                if reader.spec() != spec {
                    warn!(
                        path = %segment.path.display(),
                        "segment spec differs from the session spec, skipping"
                    );
                    continue;
                }
                for sample in reader.samples::<i16>() {
                    let sample = sample.map_err(|e| {
                        MergeError::Io(format!("{}: {}", segment.path.display(), e))
                    })?;
                    writer
                        .write_sample(sample)
                        .map_err(|e| MergeError::Encode(e.to_string()))?;
                }
                merged += 1;
            }
            writer.finalize().map_err(|e| MergeError::Encode(e.to_string()))?;
            Ok(merged)
        };

        let merged = match write() {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };

        // Verify the scratch file decodes before it replaces anything
        let stats = match Self::file_stats(&tmp) {
            Ok(stats) => stats,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        Self::replace_file(&tmp, dest)?;

        // Inputs are only deleted once the artifact is in place
        for segment in &decodable {
            if let Err(e) = fs::remove_file(&segment.path) {
                warn!(path = %segment.path.display(), error = %e, "could not remove merged segment");
            }
        }

        debug!(
            dest = %dest.display(),
            merged,
            skipped = skipped + (decodable.len() - merged),
            "segments merged"
        );
        Ok(MergeOutcome {
            artifact_path: dest.to_path_buf(),
            file_size_bytes: stats.size_bytes,
            duration: stats.duration,
            segments_merged: merged,
            segments_skipped: skipped + (decodable.len() - merged),
        })
    }

    fn probe(&self, path: &Path) -> Option<SealedStats> {
        let reader = Self::open_reader(path)?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return None;
        }
        let frames = reader.duration() as u64;
        let duration = StdDuration::from_secs_f64(frames as f64 / spec.sample_rate as f64);
        let size_bytes = fs::metadata(path).ok()?.len();
        Some(SealedStats { size_bytes, duration })
    }

    fn discard_files(&self, paths: &[PathBuf]) -> usize {
        let mut removed = 0;
        for path in paths {
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove file"),
            }
        }
        removed
    }
}

fn scratch_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}
