//! Resource probe port interface

use std::path::Path;
use std::time::Duration as StdDuration;

/// Port for reading the resource conditions the limit policy watches.
///
/// Readings a platform cannot provide come back as `None` and the
/// corresponding limit is simply not enforced there.
pub trait ResourceProbe: Send + Sync {
    /// Free bytes on the volume holding `path`
    fn free_storage_bytes(&self, path: &Path) -> Option<u64>;

    /// Battery charge 0..=100, `None` on mains-only machines
    fn battery_percent(&self) -> Option<u8>;

    /// Remaining background execution budget, `None` when unlimited
    fn background_budget(&self) -> Option<StdDuration>;
}
