//! System resource probe
//!
//! Free storage via sysinfo; battery read from the power supply class
//! on Linux. Readings a platform cannot provide come back as None and
//! the matching limit is simply not enforced there.

use std::path::Path;
use std::time::Duration as StdDuration;

use sysinfo::Disks;

use crate::application::ports::ResourceProbe;

pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemProbe {
    fn free_storage_bytes(&self, path: &Path) -> Option<u64> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }

    fn battery_percent(&self) -> Option<u8> {
        battery_percent_impl()
    }

    fn background_budget(&self) -> Option<StdDuration> {
        // Desktop sessions have no execution budget
        None
    }
}

#[cfg(target_os = "linux")]
fn battery_percent_impl() -> Option<u8> {
    let entries = std::fs::read_dir("/sys/class/power_supply").ok()?;
    for entry in entries.flatten() {
        let dir = entry.path();
        let is_battery = std::fs::read_to_string(dir.join("type"))
            .map(|t| t.trim() == "Battery")
            .unwrap_or(false);
        if !is_battery {
            continue;
        }
        if let Ok(capacity) = std::fs::read_to_string(dir.join("capacity")) {
            if let Ok(pct) = capacity.trim().parse::<u8>() {
                return Some(pct.min(100));
            }
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn battery_percent_impl() -> Option<u8> {
    None
}
