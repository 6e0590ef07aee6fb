//! Resource limit policy
//!
//! Duration, storage, battery and background budget each have a warn
//! threshold and a stop floor. Warnings fire once per session; a stop
//! verdict repeats until the engine acts on it.

use std::fmt;
use std::time::Duration as StdDuration;

use crate::domain::config::EngineConfig;
use crate::domain::state::StopCause;

/// A threshold the session is approaching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitWarning {
    DurationNearCap { remaining: StdDuration },
    StorageLow { free_bytes: u64 },
    BatteryLow { percent: u8 },
    BudgetLow { remaining: StdDuration },
}

impl fmt::Display for LimitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DurationNearCap { remaining } => {
                write!(f, "recording stops in {}s", remaining.as_secs())
            }
            Self::StorageLow { free_bytes } => {
                write!(f, "only {} MB of storage left", free_bytes / (1024 * 1024))
            }
            Self::BatteryLow { percent } => write!(f, "battery at {}%", percent),
            Self::BudgetLow { remaining } => {
                write!(f, "background time ends in {}s", remaining.as_secs())
            }
        }
    }
}

/// Verdict of one limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitCheck {
    Ok,
    Warn(LimitWarning),
    /// Stop the session now, keeping everything captured so far
    Stop(StopCause),
}

#[derive(Debug, Default)]
struct WarnedFlags {
    duration: bool,
    storage: bool,
    battery: bool,
    budget: bool,
}

pub struct LimitMonitor {
    cfg: EngineConfig,
    warned: WarnedFlags,
}

impl LimitMonitor {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            warned: WarnedFlags::default(),
        }
    }

    /// Clear per-session warning state.
    pub fn reset(&mut self) {
        self.warned = WarnedFlags::default();
    }

    pub fn check_duration(&mut self, elapsed: StdDuration) -> LimitCheck {
        if elapsed >= self.cfg.max_duration {
            return LimitCheck::Stop(StopCause::DurationCap);
        }
        if elapsed >= self.cfg.duration_warning && !self.warned.duration {
            self.warned.duration = true;
            let remaining = self.cfg.max_duration.saturating_sub(elapsed);
            return LimitCheck::Warn(LimitWarning::DurationNearCap { remaining });
        }
        LimitCheck::Ok
    }

    pub fn check_storage(&mut self, free_bytes: Option<u64>) -> LimitCheck {
        let Some(free) = free_bytes else {
            return LimitCheck::Ok;
        };
        if free < self.cfg.storage_stop_bytes {
            return LimitCheck::Stop(StopCause::StorageExhausted);
        }
        if free < self.cfg.storage_warn_bytes && !self.warned.storage {
            self.warned.storage = true;
            return LimitCheck::Warn(LimitWarning::StorageLow { free_bytes: free });
        }
        LimitCheck::Ok
    }

    pub fn check_battery(&mut self, percent: Option<u8>) -> LimitCheck {
        let Some(pct) = percent else {
            return LimitCheck::Ok;
        };
        if pct < self.cfg.battery_stop_percent {
            return LimitCheck::Stop(StopCause::BatteryCritical);
        }
        if pct < self.cfg.battery_warn_percent && !self.warned.battery {
            self.warned.battery = true;
            return LimitCheck::Warn(LimitWarning::BatteryLow { percent: pct });
        }
        LimitCheck::Ok
    }

    /// The budget cannot be extended, so the stop leg fires early
    /// enough to seal and merge before the platform kills the process.
    pub fn check_budget(&mut self, remaining: Option<StdDuration>) -> LimitCheck {
        let Some(rem) = remaining else {
            return LimitCheck::Ok;
        };
        if rem <= self.cfg.budget_stop {
            return LimitCheck::Stop(StopCause::BudgetExpired);
        }
        if rem <= self.cfg.budget_warning && !self.warned.budget {
            self.warned.budget = true;
            return LimitCheck::Warn(LimitWarning::BudgetLow { remaining: rem });
        }
        LimitCheck::Ok
    }
}
