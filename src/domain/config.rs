//! Application configuration value objects

use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};

use crate::domain::duration::Duration;
use crate::domain::error::ConfigError;

/// Threshold overrides, grouped in their own config section.
/// All fields are optional to support partial configs and merging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TuningConfig {
    pub short_call_threshold: Option<String>,
    pub decision_timeout: Option<String>,
    pub mic_poll_interval: Option<String>,
    pub mic_wait_limit: Option<String>,
    pub soft_checkpoint_interval: Option<String>,
    pub hard_checkpoint_interval: Option<String>,
    pub silence_threshold_dbfs: Option<f32>,
    pub max_duration: Option<String>,
    pub duration_warning: Option<String>,
    pub storage_warn_mb: Option<u64>,
    pub storage_stop_mb: Option<u64>,
    pub battery_warn_percent: Option<u8>,
    pub battery_stop_percent: Option<u8>,
}

/// Application configuration.
/// All fields are optional to support partial configs and merging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub output_dir: Option<String>,
    pub notify: Option<bool>,
    pub tuning: Option<TuningConfig>,
}

impl AppConfig {
    /// Create config with default values
    pub fn defaults() -> Self {
        Self {
            output_dir: None,
            notify: Some(true),
            tuning: Some(TuningConfig {
                short_call_threshold: Some("3m".to_string()),
                decision_timeout: Some("30s".to_string()),
                mic_poll_interval: Some("2s".to_string()),
                mic_wait_limit: Some("5m".to_string()),
                soft_checkpoint_interval: Some("30s".to_string()),
                hard_checkpoint_interval: Some("1m30s".to_string()),
                silence_threshold_dbfs: Some(-40.0),
                max_duration: Some("3h".to_string()),
                duration_warning: Some("2h45m".to_string()),
                storage_warn_mb: Some(200),
                storage_stop_mb: Some(100),
                battery_warn_percent: Some(15),
                battery_stop_percent: Some(5),
            }),
        }
    }

    /// Create an empty config (all None)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge this config with another, where other takes precedence.
    /// Only non-None values from other will override this.
    pub fn merge(self, other: Self) -> Self {
        Self {
            output_dir: other.output_dir.or(self.output_dir),
            notify: other.notify.or(self.notify),
            tuning: Self::merge_tuning(self.tuning, other.tuning),
        }
    }

    fn merge_tuning(base: Option<TuningConfig>, other: Option<TuningConfig>) -> Option<TuningConfig> {
        match (base, other) {
            (None, None) => None,
            (Some(b), None) => Some(b),
            (None, Some(o)) => Some(o),
            (Some(b), Some(o)) => Some(TuningConfig {
                short_call_threshold: o.short_call_threshold.or(b.short_call_threshold),
                decision_timeout: o.decision_timeout.or(b.decision_timeout),
                mic_poll_interval: o.mic_poll_interval.or(b.mic_poll_interval),
                mic_wait_limit: o.mic_wait_limit.or(b.mic_wait_limit),
                soft_checkpoint_interval: o.soft_checkpoint_interval.or(b.soft_checkpoint_interval),
                hard_checkpoint_interval: o.hard_checkpoint_interval.or(b.hard_checkpoint_interval),
                silence_threshold_dbfs: o.silence_threshold_dbfs.or(b.silence_threshold_dbfs),
                max_duration: o.max_duration.or(b.max_duration),
                duration_warning: o.duration_warning.or(b.duration_warning),
                storage_warn_mb: o.storage_warn_mb.or(b.storage_warn_mb),
                storage_stop_mb: o.storage_stop_mb.or(b.storage_stop_mb),
                battery_warn_percent: o.battery_warn_percent.or(b.battery_warn_percent),
                battery_stop_percent: o.battery_stop_percent.or(b.battery_stop_percent),
            }),
        }
    }

    /// Get notify setting, or true if not set
    pub fn notify_or_default(&self) -> bool {
        self.notify.unwrap_or(true)
    }

    /// Resolve the engine thresholds, falling back to defaults for
    /// missing or unparseable entries.
    pub fn engine_config(&self) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        let Some(t) = &self.tuning else {
            return cfg;
        };

        let parse = |s: &Option<String>| -> Option<StdDuration> {
            s.as_ref().and_then(|v| v.parse::<Duration>().ok()).map(|d| d.as_std())
        };

        if let Some(d) = parse(&t.short_call_threshold) {
            cfg.short_call_threshold = d;
        }
        if let Some(d) = parse(&t.decision_timeout) {
            cfg.decision_timeout = d;
        }
        if let Some(d) = parse(&t.mic_poll_interval) {
            cfg.mic_poll_interval = d;
        }
        if let Some(d) = parse(&t.mic_wait_limit) {
            cfg.mic_wait_limit = d;
        }
        if let Some(d) = parse(&t.soft_checkpoint_interval) {
            cfg.soft_checkpoint_interval = d;
        }
        if let Some(d) = parse(&t.hard_checkpoint_interval) {
            cfg.hard_checkpoint_interval = d;
        }
        if let Some(v) = t.silence_threshold_dbfs {
            cfg.silence_threshold_dbfs = v;
        }
        if let Some(d) = parse(&t.max_duration) {
            cfg.max_duration = d;
            // A lowered cap drags the warning down with it, otherwise
            // the stock warning could sit past the new cap
            if t.duration_warning.is_none() {
                cfg.duration_warning = warning_for_cap(d);
            }
        }
        if let Some(d) = parse(&t.duration_warning) {
            cfg.duration_warning = d;
        }
        if let Some(mb) = t.storage_warn_mb {
            cfg.storage_warn_bytes = mb * 1024 * 1024;
        }
        if let Some(mb) = t.storage_stop_mb {
            cfg.storage_stop_bytes = mb * 1024 * 1024;
        }
        if let Some(p) = t.battery_warn_percent {
            cfg.battery_warn_percent = p;
        }
        if let Some(p) = t.battery_stop_percent {
            cfg.battery_stop_percent = p;
        }
        cfg
    }
}

/// How far ahead of the duration cap the warning fires.
const DURATION_WARNING_LEAD: StdDuration = StdDuration::from_secs(15 * 60);

/// Warning threshold for a given duration cap. Caps too short for the
/// usual lead warn at three quarters of the cap instead.
fn warning_for_cap(cap: StdDuration) -> StdDuration {
    if cap > DURATION_WARNING_LEAD * 2 {
        cap - DURATION_WARNING_LEAD
    } else {
        cap * 3 / 4
    }
}

/// Resolved engine thresholds.
///
/// Durations compared against the logic clock; byte and percent floors
/// compared against probe readings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Calls shorter than this resume without asking
    pub short_call_threshold: StdDuration,
    /// How long a resume prompt waits for an answer
    pub decision_timeout: StdDuration,
    /// Poll cadence while waiting for a microphone to return
    pub mic_poll_interval: StdDuration,
    /// Give up waiting for a microphone after this long
    pub mic_wait_limit: StdDuration,
    /// Settle delay before trusting a freshly resumed capture
    pub resume_settle: StdDuration,
    /// Extra grace before declaring a resume attempt failed
    pub resume_grace: StdDuration,
    /// Flush cadence during silence
    pub soft_checkpoint_interval: StdDuration,
    /// Flush cadence regardless of level
    pub hard_checkpoint_interval: StdDuration,
    /// At or below this level the input counts as silent
    pub silence_threshold_dbfs: f32,
    /// Consecutive ticks without byte growth before stall recovery
    pub stall_tick_limit: u32,
    /// Cadence of the per-second housekeeping tick
    pub tick_interval: StdDuration,
    /// Cadence of storage and battery probing
    pub resource_poll_interval: StdDuration,
    pub max_duration: StdDuration,
    pub duration_warning: StdDuration,
    pub storage_warn_bytes: u64,
    pub storage_stop_bytes: u64,
    pub battery_warn_percent: u8,
    pub battery_stop_percent: u8,
    /// Warn when the background budget drops below this
    pub budget_warning: StdDuration,
    /// Stop and save when the background budget drops below this
    pub budget_stop: StdDuration,
    /// Recovered artifacts smaller than this are discarded
    pub salvage_min_bytes: u64,
    /// Recovered artifacts shorter than this are discarded
    pub salvage_min_duration: StdDuration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            short_call_threshold: StdDuration::from_secs(180),
            decision_timeout: StdDuration::from_secs(30),
            mic_poll_interval: StdDuration::from_secs(2),
            mic_wait_limit: StdDuration::from_secs(300),
            resume_settle: StdDuration::from_millis(200),
            resume_grace: StdDuration::from_millis(150),
            soft_checkpoint_interval: StdDuration::from_secs(30),
            hard_checkpoint_interval: StdDuration::from_secs(90),
            silence_threshold_dbfs: -40.0,
            stall_tick_limit: 3,
            tick_interval: StdDuration::from_secs(1),
            resource_poll_interval: StdDuration::from_secs(10),
            max_duration: StdDuration::from_secs(3 * 3600),
            duration_warning: StdDuration::from_secs(2 * 3600 + 45 * 60),
            storage_warn_bytes: 200 * 1024 * 1024,
            storage_stop_bytes: 100 * 1024 * 1024,
            battery_warn_percent: 15,
            battery_stop_percent: 5,
            budget_warning: StdDuration::from_secs(60),
            budget_stop: StdDuration::from_secs(10),
            salvage_min_bytes: 1024,
            salvage_min_duration: StdDuration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Reject threshold combinations that would fight each other.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration_warning >= self.max_duration {
            return Err(ConfigError::ValidationError {
                key: "duration_warning".to_string(),
                message: "must be shorter than max_duration".to_string(),
            });
        }
        if self.storage_stop_bytes >= self.storage_warn_bytes {
            return Err(ConfigError::ValidationError {
                key: "storage_stop_mb".to_string(),
                message: "must be below storage_warn_mb".to_string(),
            });
        }
        if self.battery_stop_percent >= self.battery_warn_percent {
            return Err(ConfigError::ValidationError {
                key: "battery_stop_percent".to_string(),
                message: "must be below battery_warn_percent".to_string(),
            });
        }
        if self.soft_checkpoint_interval > self.hard_checkpoint_interval {
            return Err(ConfigError::ValidationError {
                key: "soft_checkpoint_interval".to_string(),
                message: "must not exceed hard_checkpoint_interval".to_string(),
            });
        }
        if self.mic_poll_interval > self.mic_wait_limit {
            return Err(ConfigError::ValidationError {
                key: "mic_poll_interval".to_string(),
                message: "must not exceed mic_wait_limit".to_string(),
            });
        }
        if self.budget_stop >= self.budget_warning {
            return Err(ConfigError::ValidationError {
                key: "budget_stop".to_string(),
                message: "must be below budget_warning".to_string(),
            });
        }
        Ok(())
    }

    /// True when a recovered artifact is worth keeping.
    pub fn meets_salvage_floor(&self, size_bytes: u64, duration: StdDuration) -> bool {
        size_bytes >= self.salvage_min_bytes && duration >= self.salvage_min_duration
    }
}
