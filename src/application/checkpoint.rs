//! Durability checkpoint policy
//!
//! Flushes are cheapest when nothing interesting is being said, so the
//! soft interval fires only during silence. The hard interval fires
//! regardless of level and bounds how much audio a crash can take.

use std::time::Duration as StdDuration;

use crate::domain::config::EngineConfig;

/// Whether a flush is due, and which rule made it due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDue {
    No,
    /// Soft interval elapsed and the input is silent
    Soft,
    /// Hard interval elapsed, level irrelevant
    Hard,
}

#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    soft_interval: StdDuration,
    hard_interval: StdDuration,
    silence_threshold_dbfs: f32,
}

impl CheckpointPolicy {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            soft_interval: cfg.soft_checkpoint_interval,
            hard_interval: cfg.hard_checkpoint_interval,
            silence_threshold_dbfs: cfg.silence_threshold_dbfs,
        }
    }

    /// Decide whether to flush given time since the last flush and the
    /// recent input level.
    pub fn due(&self, since_last: StdDuration, level_dbfs: f32) -> FlushDue {
        if since_last >= self.hard_interval {
            return FlushDue::Hard;
        }
        if since_last >= self.soft_interval && level_dbfs <= self.silence_threshold_dbfs {
            return FlushDue::Soft;
        }
        FlushDue::No
    }
}
