//! Notification infrastructure module
//!
//! Provides cross-platform notification support using notify-rust, plus
//! a no-op adapter for sessions that run with notifications disabled.

mod notify_rust;
mod null;

pub use notify_rust::NotifyRustNotifier;
pub use null::NullNotifier;

use crate::application::ports::Notifier;

/// Create the notifier for the current platform
///
/// `enabled = false` returns a no-op adapter so the engine can notify
/// unconditionally.
pub fn create_notifier(enabled: bool) -> Box<dyn Notifier> {
    if enabled {
        Box::new(NotifyRustNotifier::new())
    } else {
        Box::new(NullNotifier::new())
    }
}
